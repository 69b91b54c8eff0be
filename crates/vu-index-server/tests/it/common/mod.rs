use std::path::Path;
use std::time::Duration;

use assert_fs::fixture::{FileWriteBin, PathChild};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;

use vu_test::{IndexServerOptions, PypiServer, index_server_bin, reserve_port, workspace_root};

/// Options that launch the bundled server binary.
pub(crate) fn bundled_options() -> IndexServerOptions {
    IndexServerOptions::default()
        .with_program(index_server_bin!())
        .with_top(workspace_root())
        .with_ready_timeout(Duration::from_secs(30))
}

/// Start the bundled server for `packages` on a freshly reserved port.
pub(crate) fn start_bundled(packages: &Path, allow_remote_fallback: bool) -> PypiServer {
    let port = reserve_port().expect("Failed to reserve a port");
    bundled_options()
        .start(packages, port, allow_remote_fallback)
        .expect("Failed to start the index server")
}

/// A directory with two small source distributions.
pub(crate) fn packages() -> assert_fs::TempDir {
    let root = assert_fs::TempDir::new().expect("Failed to create package directory");
    root.child("pure_python_package-0.2.1.tar.gz")
        .write_binary(b"pure python")
        .expect("Failed to write archive");
    root.child("project_with_c-0.1.0.tar.gz")
        .write_binary(b"project with c")
        .expect("Failed to write archive");
    root
}

/// A client that never follows redirects and never uses a proxy.
pub(crate) fn client() -> Client {
    Client::builder()
        .redirect(Policy::none())
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to build HTTP client")
}
