//! The chain that turns a textual component identifier into a node
//! type plus default named options.
//!
//! Order of consultation: builtin registry, the application's own
//! resolver, then the configuration file (direct entries, then
//! aliases). A miss everywhere surfaces as `NotFound` to the caller;
//! resolvers themselves never mutate state on a miss.

use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use sluice_core::options::NamedOptions;
use sluice_core::{FlowError, NodeType, ResolvedType, Resolver};

/// Registry of known node types, looked up by description name.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<Rc<NodeType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    pub fn add(&mut self, node_type: Rc<NodeType>) -> Result<(), FlowError> {
        if self.find(node_type.name()).is_some() {
            return Err(FlowError::DuplicateName(node_type.name().to_string()));
        }
        self.types.push(node_type);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<Rc<NodeType>> {
        self.types.iter().find(|t| t.name() == name).cloned()
    }

    pub fn types(&self) -> &[Rc<NodeType>] {
        &self.types
    }
}

impl Resolver for TypeRegistry {
    fn resolve(&self, id: &str) -> Option<ResolvedType> {
        self.find(id).map(|node_type| ResolvedType {
            node_type,
            options: NamedOptions::new(),
        })
    }
}

/// Consult a list of resolvers in order; the first hit wins.
#[derive(Default)]
pub struct ChainResolver {
    resolvers: Vec<Rc<dyn Resolver>>,
}

impl ChainResolver {
    pub fn new(resolvers: Vec<Rc<dyn Resolver>>) -> Self {
        ChainResolver { resolvers }
    }

    pub fn push(&mut self, resolver: Rc<dyn Resolver>) {
        self.resolvers.push(resolver);
    }
}

impl Resolver for ChainResolver {
    fn resolve(&self, id: &str) -> Option<ResolvedType> {
        self.resolvers.iter().find_map(|r| r.resolve(id))
    }
}

/// One configuration entry: the underlying type plus `name=value`
/// option strings parsed against that type's layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// The configuration document of the file resolver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Plain renames: id -> underlying type name.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    /// Configured instances: id -> type plus default options.
    #[serde(default)]
    pub configs: HashMap<String, ConfigEntry>,
}

impl ResolverConfig {
    pub fn from_json(text: &str) -> Result<Self, FlowError> {
        serde_json::from_str(text)
            .map_err(|e| FlowError::InvalidArgument(format!("resolver configuration: {e}")))
    }
}

/// Resolver backed by a configuration document. Underlying type names
/// are resolved through `base` (normally the builtin/user chain).
pub struct ConfigResolver {
    config: ResolverConfig,
    base: Rc<dyn Resolver>,
}

impl ConfigResolver {
    pub fn new(config: ResolverConfig, base: Rc<dyn Resolver>) -> Self {
        ConfigResolver { config, base }
    }

    pub fn from_json(text: &str, base: Rc<dyn Resolver>) -> Result<Self, FlowError> {
        Ok(ConfigResolver {
            config: ResolverConfig::from_json(text)?,
            base,
        })
    }
}

impl Resolver for ConfigResolver {
    fn resolve(&self, id: &str) -> Option<ResolvedType> {
        if let Some(entry) = self.config.configs.get(id) {
            let mut resolved = self.base.resolve(&entry.type_name)?;
            let named = match NamedOptions::from_strv(
                &entry.options,
                resolved.node_type.options_layout(),
            ) {
                Ok(named) => named,
                Err(e) => {
                    tracing::warn!(id, error = %e, "configuration entry has bad options");
                    return None;
                }
            };
            resolved.options.merge_from(named);
            return Some(resolved);
        }
        if let Some(target) = self.config.aliases.get(id) {
            return self.base.resolve(target);
        }
        None
    }
}

/// The standard chain: builtin registry, optional user resolver,
/// optional configuration file.
pub fn default_chain(
    registry: Rc<TypeRegistry>,
    user: Option<Rc<dyn Resolver>>,
    config: Option<ResolverConfig>,
) -> Rc<ChainResolver> {
    let mut chain = ChainResolver::default();
    chain.push(registry.clone());
    if let Some(user) = &user {
        chain.push(user.clone());
    }
    if let Some(config) = config {
        // configured ids resolve their underlying type through the
        // builtin/user part of the chain
        let mut base = ChainResolver::default();
        base.push(registry);
        if let Some(user) = user {
            base.push(user);
        }
        let base: Rc<dyn Resolver> = Rc::new(base);
        chain.push(Rc::new(ConfigResolver::new(config, base)));
    }
    Rc::new(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::node_prelude::*;
    use sluice_core::{Node, NodeContext};
    use std::rc::Rc;

    #[derive(Debug)]
    struct Inert;
    impl Node for Inert {
        fn process(
            &mut self,
            _ctx: &mut dyn NodeContext,
            _port: PortIndex,
            _conn_id: ConnId,
            _packet: &Packet,
        ) -> Result<(), FlowError> {
            Ok(())
        }
    }

    fn blink_type() -> Rc<NodeType> {
        NodeType::new(
            TypeDescription::named("test/blink"),
            vec![],
            vec![PortSpec::new("OUT", PacketType::Boolean)],
            OptionsLayout::new(vec![OptionSpec::new("interval", OptionType::Int)
                .with_default(OptionValue::Int(1000))])
            .expect("layout"),
            NodeTypeFlags::empty(),
            Box::new(|_, _| Ok(Box::new(Inert))),
        )
        .expect("valid type")
    }

    #[test]
    fn registry_resolves_by_name() {
        let mut registry = TypeRegistry::new();
        registry.add(blink_type()).expect("adds");
        assert!(registry.add(blink_type()).is_err());
        let resolved = registry.resolve("test/blink").expect("hit");
        assert_eq!(resolved.node_type.name(), "test/blink");
        assert!(resolved.options.is_empty());
        assert!(registry.resolve("test/unknown").is_none());
    }

    #[test]
    fn config_entries_carry_parsed_options() {
        let mut registry = TypeRegistry::new();
        registry.add(blink_type()).expect("adds");
        let registry = Rc::new(registry);
        let config: ResolverConfig = serde_json::from_str(
            r#"{
                "aliases": { "Blink": "test/blink" },
                "configs": {
                    "fast-blink": { "type": "test/blink", "options": ["interval=100"] }
                }
            }"#,
        )
        .expect("valid json");
        let chain = default_chain(registry, None, Some(config));

        // direct name still wins through the builtin step
        assert!(chain.resolve("test/blink").is_some());

        let fast = chain.resolve("fast-blink").expect("config entry");
        assert_eq!(fast.node_type.name(), "test/blink");
        assert_eq!(fast.options.get("interval"), Some(&OptionValue::Int(100)));

        let alias = chain.resolve("Blink").expect("alias");
        assert_eq!(alias.node_type.name(), "test/blink");
        assert!(alias.options.is_empty());

        assert!(chain.resolve("no-such-thing").is_none());
    }

    #[test]
    fn user_resolver_is_consulted_after_builtins() {
        struct Fixed(Rc<NodeType>);
        impl Resolver for Fixed {
            fn resolve(&self, id: &str) -> Option<ResolvedType> {
                (id == "mine").then(|| ResolvedType {
                    node_type: self.0.clone(),
                    options: NamedOptions::new(),
                })
            }
        }
        let registry = Rc::new(TypeRegistry::new());
        let chain = default_chain(registry, Some(Rc::new(Fixed(blink_type()))), None);
        assert!(chain.resolve("mine").is_some());
        assert!(chain.resolve("test/blink").is_none());
    }
}
