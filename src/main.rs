//! CLI mínima del motor: imprime el registro JSON canónico de cada archivo.

use metalens::extract_metadata;
use std::env;
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("Uso: metalens <archivo> [<archivo> ...]");
        eprintln!("Imprime la metadata extraída de cada archivo como JSON.");
        process::exit(1);
    }

    for path in &paths {
        let record = extract_metadata(Path::new(path));
        match serde_json::to_string_pretty(&record.to_json()) {
            Ok(json) => println!("{json}"),
            Err(error) => eprintln!("No se pudo serializar la metadata de `{path}`: {error}"),
        }
    }
}
