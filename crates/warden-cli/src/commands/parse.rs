use std::fs;
use std::path::Path;

pub fn cmd_parse(file: &Path) -> Result<(), String> {
    let source = fs::read_to_string(file).map_err(|e| format!("reading '{}': {}", file.display(), e))?;
    let document_name = file.file_name().and_then(|n| n.to_str()).unwrap_or("<unknown>");

    let document = warden_core::parse_document(&source, document_name).map_err(|e| e.to_string())?;

    let json = serde_json::to_string_pretty(&document).map_err(|e| format!("serializing AST: {}", e))?;
    println!("{}", json);
    Ok(())
}
