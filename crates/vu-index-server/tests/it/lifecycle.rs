use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use test_log::test;

use vu_test::{ServerState, poll_ready, reserve_port};

use crate::common::{bundled_options, client, packages, start_bundled};

#[test]
fn ready_after_start() -> Result<()> {
    let packages = packages();
    let server = start_bundled(packages.path(), false);

    assert_eq!(server.state(), ServerState::Ready);
    assert_eq!(
        server.base_url(),
        format!("http://localhost:{}", server.port())
    );
    assert!(poll_ready(server.base_url())?);

    let response = client().get(server.base_url()).send()?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[test]
fn stop_twice() -> Result<()> {
    let packages = packages();
    let mut server = start_bundled(packages.path(), false);
    let base_url = server.base_url().to_string();

    server.stop()?;
    assert_eq!(server.state(), ServerState::Terminated);
    server.stop()?;
    assert_eq!(server.state(), ServerState::Terminated);

    // Nothing listens on the port anymore.
    assert!(!poll_ready(&base_url)?);
    Ok(())
}

#[test]
fn drop_stops_the_server() -> Result<()> {
    let packages = packages();
    let server = start_bundled(packages.path(), false);
    let base_url = server.base_url().to_string();
    drop(server);

    assert!(!poll_ready(&base_url)?);
    Ok(())
}

#[test]
fn empty_package_directory() -> Result<()> {
    let packages = assert_fs::TempDir::new()?;
    let server = start_bundled(packages.path(), false);

    let response = client()
        .get(format!("{}/simple/pure-python-package/", server.base_url()))
        .send()?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[test]
fn servers_run_side_by_side() -> Result<()> {
    let first_packages = packages();
    let second_packages = assert_fs::TempDir::new()?;
    let first = start_bundled(first_packages.path(), false);
    let second = start_bundled(second_packages.path(), false);
    assert_ne!(first.port(), second.port());

    let client = client();
    let url = |server: &vu_test::PypiServer| {
        format!("{}/simple/pure-python-package/", server.base_url())
    };
    assert_eq!(client.get(url(&first)).send()?.status(), StatusCode::OK);
    assert_eq!(
        client.get(url(&second)).send()?.status(),
        StatusCode::NOT_FOUND
    );
    Ok(())
}

#[test]
fn invalid_arguments_fail_startup() -> Result<()> {
    let packages = packages();
    let port = reserve_port()?;
    let err = bundled_options()
        .with_fallback_url("not a url")
        .start(packages.path(), port, true)
        .unwrap_err();
    assert!(
        matches!(err, vu_test::Error::Startup { code: Some(2) }),
        "{err:?}"
    );
    Ok(())
}

/// Stand-ins for the server process, to exercise the failure modes of startup.
#[cfg(unix)]
mod unix {
    use std::io::Write;
    use std::net::{Ipv4Addr, TcpListener};
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::Result;
    use assert_fs::prelude::*;
    use test_log::test;

    use vu_test::{Error, IndexServerOptions, ProbeOutcome, reserve_port};

    fn fake_server(dir: &assert_fs::TempDir, body: &str) -> PathBuf {
        let script = dir.child("fake-pypi-server");
        script
            .write_str(&format!("#!/bin/sh\n{body}\n"))
            .expect("Failed to write script");
        fs_err::set_permissions(script.path(), std::fs::Permissions::from_mode(0o755))
            .expect("Failed to make script executable");
        script.to_path_buf()
    }

    fn options(program: PathBuf, dir: &assert_fs::TempDir) -> IndexServerOptions {
        IndexServerOptions::default()
            .with_program(program)
            .with_top(dir.path())
            .with_poll_interval(Duration::from_millis(50))
    }

    #[test]
    fn readiness_timeout() -> Result<()> {
        let dir = assert_fs::TempDir::new()?;
        let program = fake_server(&dir, "exec sleep 60");
        let port = reserve_port()?;
        let budget = Duration::from_millis(500);

        let start = Instant::now();
        let err = options(program, &dir)
            .with_ready_timeout(budget)
            .start(dir.path(), port, false)
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(
            matches!(
                err,
                Error::ReadinessTimeout {
                    last: ProbeOutcome::Refused,
                    ..
                }
            ),
            "{err:?}"
        );
        assert!(elapsed >= budget, "{elapsed:?}");
        assert!(elapsed < budget + Duration::from_secs(2), "{elapsed:?}");
        Ok(())
    }

    #[test]
    fn early_exit() -> Result<()> {
        let dir = assert_fs::TempDir::new()?;
        let program = fake_server(&dir, "exit 3");
        let port = reserve_port()?;

        let err = options(program, &dir)
            .with_ready_timeout(Duration::from_secs(10))
            .start(dir.path(), port, false)
            .unwrap_err();
        assert!(matches!(err, Error::Startup { code: Some(3) }), "{err:?}");
        Ok(())
    }

    #[test]
    fn malformed_responses_are_fatal() -> Result<()> {
        let dir = assert_fs::TempDir::new()?;
        let program = fake_server(&dir, "exec sleep 60");

        // Something that is not an HTTP server occupies the port.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let port = listener.local_addr()?.port();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    break;
                };
                let _ = stream.write_all(b"this is not http\r\n\r\n");
            }
        });

        let start = Instant::now();
        let err = options(program, &dir)
            .with_ready_timeout(Duration::from_secs(20))
            .start(dir.path(), port, false)
            .unwrap_err();

        assert!(matches!(err, Error::ProbeFatal { .. }), "{err:?}");
        assert!(start.elapsed() < Duration::from_secs(10));
        Ok(())
    }
}
