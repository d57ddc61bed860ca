//! Reverse-proxy routing document.
//!
//! One location per routing rule. Upstreams are resolved through the
//! container runtime's embedded DNS at request time, so the proxy keeps
//! serving the other nodes while one of them is stopped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::deploy::compose::PROXY_CONTAINER_PORT;
use crate::record::RoutingRule;

/// Embedded DNS server of user-defined container networks.
const CONTAINER_DNS: &str = "127.0.0.11";

/// Proxy configuration rendered to nginx syntax by its `Display` impl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub network: String,
    pub listen_port: u16,
    pub locations: Vec<ProxyLocation>,
}

/// A single proxied path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyLocation {
    pub path: String,
    pub upstream_host: String,
    pub upstream_port: u16,
}

impl ProxyConfig {
    /// Builds the proxy configuration of `network` from its routing rules.
    pub fn from_rules(network: &str, rules: &[RoutingRule]) -> Self {
        Self {
            network: network.to_string(),
            listen_port: PROXY_CONTAINER_PORT,
            locations: rules
                .iter()
                .map(|rule| ProxyLocation {
                    path: rule.public_path_prefix.clone(),
                    upstream_host: rule.upstream_host.clone(),
                    upstream_port: rule.upstream_port,
                })
                .collect(),
        }
    }
}

impl ProxyLocation {
    /// nginx variable holding the upstream URL.
    fn variable(&self) -> String {
        let stem: String = self
            .upstream_host
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("$upstream_{stem}")
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Routing for network {}. Regenerated on every render.", self.network)?;
        writeln!(f, "server {{")?;
        writeln!(f, "    listen {};", self.listen_port)?;
        writeln!(f, "    resolver {CONTAINER_DNS} valid=10s ipv6=off;")?;

        for location in &self.locations {
            writeln!(f)?;
            writeln!(f, "    location = {} {{", location.path)?;
            writeln!(f, "        if ($request_method = OPTIONS) {{")?;
            writeln!(f, "            add_header Access-Control-Allow-Origin \"*\" always;")?;
            writeln!(f, "            add_header Access-Control-Allow-Methods \"GET, POST, OPTIONS\" always;")?;
            writeln!(f, "            add_header Access-Control-Allow-Headers \"Content-Type, Authorization\" always;")?;
            writeln!(f, "            add_header Access-Control-Max-Age 86400 always;")?;
            writeln!(f, "            return 204;")?;
            writeln!(f, "        }}")?;
            writeln!(f, "        add_header Access-Control-Allow-Origin \"*\" always;")?;
            writeln!(
                f,
                "        set {} http://{}:{};",
                location.variable(),
                location.upstream_host,
                location.upstream_port
            )?;
            writeln!(f, "        proxy_pass {}/graphql;", location.variable())?;
            writeln!(f, "        proxy_http_version 1.1;")?;
            writeln!(f, "        proxy_set_header Host $host;")?;
            writeln!(f, "        proxy_set_header Upgrade $http_upgrade;")?;
            writeln!(f, "        proxy_set_header Connection \"upgrade\";")?;
            writeln!(f, "    }}")?;
        }

        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<RoutingRule> {
        vec![
            RoutingRule {
                public_path_prefix: "/seed-0/graphql".into(),
                upstream_host: "seed-0-alpha".into(),
                upstream_port: 3001,
            },
            RoutingRule {
                public_path_prefix: "/whale-0/graphql".into(),
                upstream_host: "whale-0-alpha".into(),
                upstream_port: 4001,
            },
        ]
    }

    #[test]
    fn test_render_locations() {
        let conf = ProxyConfig::from_rules("alpha", &rules()).to_string();

        assert!(conf.contains("listen 80;"));
        assert!(conf.contains("location = /seed-0/graphql {"));
        assert!(conf.contains("set $upstream_whale_0_alpha http://whale-0-alpha:4001;"));
        assert!(conf.contains("proxy_pass $upstream_whale_0_alpha/graphql;"));
        assert_eq!(conf.matches("return 204;").count(), 2);
        assert_eq!(conf.matches('{').count(), conf.matches('}').count());
    }

    #[test]
    fn test_render_without_rules() {
        let conf = ProxyConfig::from_rules("alpha", &[]).to_string();
        assert!(conf.starts_with("# Routing for network alpha."));
        assert!(!conf.contains("location"));
    }
}
