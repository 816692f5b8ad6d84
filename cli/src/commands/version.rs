//! `codepass version`

/// Print the package version, as text or as a JSON object.
pub fn run(json: bool) {
    let version = env!("CARGO_PKG_VERSION");
    if json {
        println!("{}", serde_json::json!({ "name": "codepass", "version": version }));
    } else {
        println!("codepass {version}");
    }
}
