use anyhow::Result;
use insta::assert_snapshot;
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use test_log::test;

use crate::common::{client, packages, start_bundled};

#[test]
fn missing_project_without_fallback() -> Result<()> {
    let packages = packages();
    let server = start_bundled(packages.path(), false);
    assert!(!server.allows_remote_fallback());

    let response = client()
        .get(format!("{}/simple/six/", server.base_url()))
        .send()?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[test]
fn missing_project_with_fallback() -> Result<()> {
    let packages = packages();
    let server = start_bundled(packages.path(), true);
    assert!(server.allows_remote_fallback());

    let response = client()
        .get(format!("{}/simple/six/", server.base_url()))
        .send()?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(LOCATION).unwrap(),
        "https://pypi.python.org/simple/six/"
    );
    Ok(())
}

#[test]
fn project_page_links_to_archives() -> Result<()> {
    let packages = packages();
    let server = start_bundled(packages.path(), false);
    let client = client();

    let page = client
        .get(format!("{}/simple/pure-python-package/", server.base_url()))
        .send()?
        .error_for_status()?
        .text()?;
    assert_snapshot!(page, @r#"
    <!DOCTYPE html>
    <html>
      <head><title>Links for pure-python-package</title></head>
      <body>
        <h1>Links for pure-python-package</h1>
        <a href="/packages/pure_python_package-0.2.1.tar.gz#sha256=9f5fd4fb693afcc4ecdebc4ef85da410f0557046cf7a83bda447a4f15ea46e9f">pure_python_package-0.2.1.tar.gz</a><br>
      </body>
    </html>
    "#);

    let archive = client
        .get(format!(
            "{}/packages/pure_python_package-0.2.1.tar.gz",
            server.base_url()
        ))
        .send()?
        .error_for_status()?
        .bytes()?;
    assert_eq!(archive.as_ref(), b"pure python");
    Ok(())
}

#[test]
fn simple_root_redirects() -> Result<()> {
    let packages = packages();
    let server = start_bundled(packages.path(), false);

    let response = client().get(server.index_url()).send()?;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers().get(LOCATION).unwrap(), "/simple/");

    let listing = client()
        .get(format!("{}/", server.index_url()))
        .send()?
        .error_for_status()?
        .text()?;
    assert!(listing.contains(r#"<a href="project-with-c/">project-with-c</a>"#));
    assert!(listing.contains(r#"<a href="pure-python-package/">pure-python-package</a>"#));
    Ok(())
}
