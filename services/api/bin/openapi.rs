use callbridge_api::router::ApiDoc;
use utoipa::OpenApi;

/// Writes the OpenAPI document for the HTTP surface to the given path
/// (`openapi.json` by default).
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    std::fs::write(&path, ApiDoc::openapi().to_pretty_json()?)?;
    println!("OpenAPI document written to {}", path);
    Ok(())
}
