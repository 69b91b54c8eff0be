use anyhow::Result;
use test_log::test;

use vu_static::EnvVars;
use vu_test::{IndexConfig, TestContext};

use crate::common::{packages, start_bundled};

#[test]
fn context_routes_installs_through_the_server() -> Result<()> {
    let packages = packages();
    let server = start_bundled(packages.path(), false);
    let context = TestContext::new().with_index(&server.index_config());

    let environment = context.environment();
    assert_eq!(
        environment
            .get(std::ffi::OsStr::new(EnvVars::PIP_INDEX_URL))
            .and_then(|value| value.to_str()),
        Some(server.index_url().as_str())
    );
    Ok(())
}

#[test]
fn contexts_without_a_server_cannot_reach_an_index() {
    let context = TestContext::new();
    assert_eq!(context.index(), &IndexConfig::unreachable());
}

#[cfg(unix)]
#[test]
fn commands_see_only_the_sanitized_environment() -> Result<()> {
    let packages = packages();
    let server = start_bundled(packages.path(), false);
    let context = TestContext::new()
        .with_index(&server.index_config())
        .with_env("VU_TEST_MARKER", "present");

    let output = context.command("/bin/sh").arg("-c").arg("env").output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;

    vu_test::assert_contains!(
        stdout,
        format!("{}={}\n", EnvVars::PIP_INDEX_URL, server.index_url())
    );
    vu_test::assert_contains!(
        stdout,
        format!("{}={}\n", EnvVars::HOME, context.home_dir.path().display())
    );
    vu_test::assert_contains!(stdout, "VU_TEST_MARKER=present\n");
    assert!(!stdout.contains("CARGO_MANIFEST_DIR="), "{stdout}");
    Ok(())
}
