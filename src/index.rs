//! Index Builder: pure functions that render protocol documents from the
//! repository read contract.
//!
//! All rendering is deterministic: project listings in sorted name order,
//! releases and files in the insertion order the store keeps them in, JSON
//! documents in the PEP 691 shape. No I/O happens here; handlers resolve the
//! data through a repository and hand it to these builders.

use serde_json::{json, Value};

use crate::store::{FileEntry, PackageEntry};

/// Media type of the machine-readable simple index (PEP 691).
pub use crate::upstream::SIMPLE_JSON_MEDIA_TYPE;

/// Simple API version advertised in JSON documents.
const API_VERSION: &str = "1.0";

/// Canonical retrieval URL for one distribution file.
///
/// Files with local bytes get the server's own packages route; cache-listed
/// files keep their external URL until their bytes are filled, at which point
/// `path` takes precedence and the canonical route is advertised.
pub fn file_url(
    server_addr: &str,
    repo: &str,
    project: &str,
    version: &str,
    file: &FileEntry,
) -> String {
    if file.path.is_none() {
        if let Some(url) = &file.url {
            return url.clone();
        }
    }
    format!(
        "{}/{}/packages/{}/{}/{}",
        server_addr.trim_end_matches('/'),
        repo,
        project,
        version,
        file.filename
    )
}

/// Metadata document URL for one distribution file: the file URL plus a
/// `/METADATA` suffix. Always advertised; a request for a release without
/// metadata answers 404.
pub fn metadata_url(
    server_addr: &str,
    repo: &str,
    project: &str,
    version: &str,
    file: &FileEntry,
) -> String {
    format!(
        "{}/METADATA",
        file_url(server_addr, repo, project, version, file)
    )
}

/// Render the project listing as a PEP 503-style HTML page.
///
/// # Example Response
/// ```html
/// <!DOCTYPE html>
/// <html>
///   <head><title>Simple index</title></head>
///   <body>
///     <h1>Simple index</h1>
///     <a href="widget/">widget</a><br/>
///   </body>
/// </html>
/// ```
pub fn project_listing_html(projects: &[String]) -> String {
    let mut html = String::from(
        r#"<!DOCTYPE html>
<html>
  <head><title>Simple index</title></head>
  <body>
    <h1>Simple index</h1>
"#,
    );

    for project in projects {
        html.push_str(&format!(
            "    <a href=\"{project}/\">{project}</a><br/>\n"
        ));
    }

    html.push_str("  </body>\n</html>");
    html
}

/// Render the project listing as a PEP 691 JSON document.
pub fn project_listing_json(projects: &[String]) -> Value {
    json!({
        "meta": {"api-version": API_VERSION},
        "projects": projects.iter().map(|name| json!({"name": name})).collect::<Vec<_>>(),
    })
}

/// Render one project's file listing as a PEP 503-style HTML page.
///
/// Each anchor carries a `#sha256=` fragment when the file's sha256 digest is
/// known, and a `data-requires-python` attribute when the release declares a
/// Python requirement.
pub fn project_html(server_addr: &str, repo: &str, entry: &PackageEntry) -> String {
    let project = &entry.name;
    let mut html = format!(
        r#"<!DOCTYPE html>
<html>
  <head><title>Links for {project}</title></head>
  <body>
    <h1>Links for {project}</h1>
"#
    );

    for release in &entry.releases {
        let requires_python = release.metadata.get("Requires-Python");
        for file in &release.files {
            let mut href = file_url(server_addr, repo, project, &release.version, file);
            if let Some(sha256) = file.hashes.get("sha256") {
                href.push_str(&format!("#sha256={sha256}"));
            }
            let requires_attr = requires_python
                .map(|rp| format!(" data-requires-python=\"{rp}\""))
                .unwrap_or_default();
            html.push_str(&format!(
                "    <a href=\"{href}\"{requires_attr}>{}</a><br/>\n",
                file.filename
            ));
        }
    }

    html.push_str("  </body>\n</html>");
    html
}

/// Render one project's file listing as a PEP 691 JSON document.
///
/// Files appear in release insertion order; each row carries the filename,
/// retrieval URL, hashes, `requires-python` (`null` when the release declares
/// none) and the always-advertised metadata document URL.
pub fn project_json(server_addr: &str, repo: &str, entry: &PackageEntry) -> Value {
    let mut files = Vec::new();
    for release in &entry.releases {
        let requires_python = release.metadata.get("Requires-Python");
        for file in &release.files {
            files.push(json!({
                "filename": file.filename,
                "version": release.version,
                "url": file_url(server_addr, repo, &entry.name, &release.version, file),
                "hashes": file.hashes,
                "requires-python": requires_python,
                "metadata-url": metadata_url(server_addr, repo, &entry.name, &release.version, file),
            }));
        }
    }

    json!({
        "meta": {"api-version": API_VERSION},
        "name": entry.name,
        "files": files,
    })
}

/// Render a release's metadata map as a plain-text document, one
/// `Key: Value` line per entry in map iteration order.
pub fn render_metadata(metadata: &std::collections::BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in metadata {
        out.push_str(&format!("{key}: {value}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::store::ReleaseEntry;

    fn sample_entry() -> PackageEntry {
        PackageEntry {
            name: "widget".to_string(),
            releases: vec![
                ReleaseEntry {
                    version: "2.0".to_string(),
                    metadata: BTreeMap::from([(
                        "Requires-Python".to_string(),
                        ">=3.8".to_string(),
                    )]),
                    files: vec![FileEntry {
                        filename: "widget-2.0.tar.gz".to_string(),
                        url: None,
                        path: Some("files/widget/2.0/widget-2.0.tar.gz".to_string()),
                        hashes: BTreeMap::from([("sha256".to_string(), "abc123".to_string())]),
                    }],
                },
                ReleaseEntry {
                    version: "1.0".to_string(),
                    metadata: BTreeMap::new(),
                    files: vec![FileEntry {
                        filename: "widget-1.0.tar.gz".to_string(),
                        url: Some("https://upstream.example/widget-1.0.tar.gz".to_string()),
                        path: None,
                        hashes: BTreeMap::new(),
                    }],
                },
            ],
            fetched_at: None,
        }
    }

    #[test]
    fn test_project_listing_documents() {
        let projects = vec!["gadget".to_string(), "widget".to_string()];

        let html = project_listing_html(&projects);
        assert!(html.contains(r#"<a href="gadget/">gadget</a>"#));
        assert!(html.contains(r#"<a href="widget/">widget</a>"#));

        let json = project_listing_json(&projects);
        assert_eq!(json["meta"]["api-version"], "1.0");
        assert_eq!(json["projects"][0]["name"], "gadget");
        assert_eq!(json["projects"][1]["name"], "widget");
    }

    #[test]
    fn test_file_url_prefers_local_path() {
        let entry = sample_entry();
        let local = &entry.releases[0].files[0];
        let external = &entry.releases[1].files[0];

        assert_eq!(
            file_url("http://localhost:3080", "pypi-local", "widget", "2.0", local),
            "http://localhost:3080/pypi-local/packages/widget/2.0/widget-2.0.tar.gz"
        );
        assert_eq!(
            file_url("http://localhost:3080", "pypi-local", "widget", "1.0", external),
            "https://upstream.example/widget-1.0.tar.gz"
        );
    }

    #[test]
    fn test_project_html_carries_hash_and_requires_python() {
        let html = project_html("http://localhost:3080", "pypi-local", &sample_entry());
        assert!(html.contains("<h1>Links for widget</h1>"));
        assert!(html.contains("#sha256=abc123"));
        assert!(html.contains(r#"data-requires-python=">=3.8""#));
        // Releases in insertion order: 2.0 before 1.0.
        let pos_20 = html.find("widget-2.0.tar.gz").unwrap();
        let pos_10 = html.find("widget-1.0.tar.gz").unwrap();
        assert!(pos_20 < pos_10);
    }

    #[test]
    fn test_project_json_shape() {
        let json = project_json("http://localhost:3080", "pypi-local", &sample_entry());
        assert_eq!(json["meta"]["api-version"], "1.0");
        assert_eq!(json["name"], "widget");

        let files = json["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["filename"], "widget-2.0.tar.gz");
        assert_eq!(files[0]["requires-python"], ">=3.8");
        assert_eq!(files[0]["hashes"]["sha256"], "abc123");
        assert_eq!(
            files[0]["metadata-url"],
            "http://localhost:3080/pypi-local/packages/widget/2.0/widget-2.0.tar.gz/METADATA"
        );
        assert_eq!(files[1]["requires-python"], Value::Null);
        assert_eq!(
            files[1]["url"],
            "https://upstream.example/widget-1.0.tar.gz"
        );
        // The metadata URL is advertised even for externally hosted files.
        assert_eq!(
            files[1]["metadata-url"],
            "https://upstream.example/widget-1.0.tar.gz/METADATA"
        );
    }

    #[test]
    fn test_render_metadata_lines() {
        let metadata = BTreeMap::from([
            ("Name".to_string(), "widget".to_string()),
            ("Requires-Python".to_string(), ">=3.8".to_string()),
        ]);
        assert_eq!(
            render_metadata(&metadata),
            "Name: widget\nRequires-Python: >=3.8\n"
        );
    }
}
