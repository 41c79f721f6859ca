use std::path::{Path, PathBuf};
use std::rc::Rc;

use sluice_common::resolver::{default_chain, ResolverConfig};
use sluice_common::{Parser, ParserClient, TypeRegistry};
use sluice_core::mainloop::{BasicMainloop, Mainloop};
use sluice_core::options::NamedOptions;
use sluice_core::single::SingleNode;
use sluice_core::{FlowError, PortIndex, ERROR_PORT};

/// Resolves `DECLARE=...:fbp:file` references relative to the program.
struct FsClient {
    base: PathBuf,
}

impl ParserClient for FsClient {
    fn read_file(&self, name: &str) -> Result<String, FlowError> {
        let path = self.base.join(name);
        std::fs::read_to_string(&path)
            .map_err(|e| FlowError::NotFound(format!("file {}: {e}", path.display())))
    }
}

fn load_resolver_config() -> Option<ResolverConfig> {
    let text = std::fs::read_to_string("sluice.json").ok()?;
    match ResolverConfig::from_json(&text) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring sluice.json");
            None
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: sluice_demo <flow.fbp>");
            std::process::exit(2);
        }
    };
    let text = std::fs::read_to_string(&path)?;

    let mut registry = TypeRegistry::new();
    sluice_std::add_std_types(&mut registry)?;
    let chain = default_chain(Rc::new(registry), None, load_resolver_config());

    let base = Path::new(&path)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut parser = Parser::new(chain, Some(Box::new(FsClient { base })));
    let node_type = parser.parse(&text, &path)?;

    let mainloop = BasicMainloop::new();
    let mut connected_out: Vec<PortIndex> = (0..node_type.port_out_count()).collect();
    connected_out.push(ERROR_PORT);

    let printer_type = node_type.clone();
    let _flow = SingleNode::new(
        mainloop.clone(),
        node_type.clone(),
        "main",
        &node_type.resolve_options(&NamedOptions::new())?,
        &[],
        &connected_out,
        Box::new(move |port, packet| {
            let name = printer_type
                .port_out(port)
                .map(|spec| spec.name.clone())
                .unwrap_or_else(|| format!("{port}"));
            println!("{name}: {packet:?}");
        }),
    )?;

    mainloop.run();
    Ok(())
}
