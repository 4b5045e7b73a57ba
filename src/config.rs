// src/config.rs

//! Configuration loading (§6.4): an XML file is deserialized into a raw,
//! schema-shaped `RawConfig`, then validated and defaulted into the
//! `Config` the rest of the process uses — the two-stage pattern the
//! teacher uses for its TOML config, adapted to `quick_xml`'s serde support.

use crate::core::constants::{self, attr};
use crate::core::registry::{Role, SubsType};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(rename = "hm")]
struct RawConfig {
    instance: RawInstance,
    #[serde(rename = "heartbeat", default)]
    heartbeats: Vec<RawHeartbeat>,
    nodes: RawNodes,
    #[serde(default)]
    subscriptions: Option<RawSubscriptions>,
}

#[derive(Debug, Deserialize)]
struct RawInstance {
    #[serde(rename = "@index")]
    index: u32,
    #[serde(rename = "address", default)]
    addresses: Vec<RawAddress>,
}

#[derive(Debug, Deserialize)]
struct RawAddress {
    #[serde(rename = "@kind")]
    kind: u32,
    #[serde(rename = "@scope")]
    scope: u32,
    #[serde(rename = "@ip_version", default = "default_ip_version")]
    ip_version: u32,
    #[serde(rename = "@host")]
    host: String,
    #[serde(rename = "@port")]
    port: u16,
}

fn default_ip_version() -> u32 {
    attr::IP_VERSION_4
}

#[derive(Debug, Deserialize)]
struct RawHeartbeat {
    #[serde(rename = "@scope")]
    scope: u32,
    #[serde(rename = "@period_ms", default)]
    period_ms: Option<u64>,
    #[serde(rename = "@threshold", default)]
    threshold: Option<u32>,
    #[serde(rename = "@resolution", default)]
    resolution: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RawNodes {
    #[serde(rename = "node", default)]
    nodes: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(rename = "@index")]
    index: u32,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@group")]
    group: u32,
    #[serde(rename = "@role", default)]
    role: u32,
}

#[derive(Debug, Deserialize, Default)]
struct RawSubscriptions {
    #[serde(rename = "subscription", default)]
    subscriptions: Vec<RawSubscription>,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    #[serde(rename = "@type")]
    sub_type: u32,
    #[serde(rename = "@value")]
    value: u32,
}

/// A resolved listen address: transport kind plus socket address.
#[derive(Debug, Clone)]
pub struct ListenAddress {
    pub transport: Transport,
    pub addr: SocketAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Multicast,
}

#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub index: u32,
    pub addresses: Vec<ListenAddress>,
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub period_ms: u64,
    pub threshold: u32,
}

#[derive(Debug, Clone)]
pub struct SeedNode {
    pub index: u32,
    pub name: String,
    pub group: u32,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct SeedSubscription {
    pub kind: SubsType,
    pub value: u32,
}

/// Validated, defaulted configuration used by the rest of the process.
#[derive(Debug, Clone)]
pub struct Config {
    pub instance: InstanceConfig,
    pub node_heartbeat: HeartbeatConfig,
    pub cluster_heartbeat: HeartbeatConfig,
    pub nodes: Vec<SeedNode>,
    pub subscriptions: Vec<SeedSubscription>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let raw: RawConfig = quick_xml::de::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let mut addresses = Vec::with_capacity(raw.instance.addresses.len());
        for a in raw.instance.addresses {
            let transport = match a.kind {
                attr::IP_TYPE_TCP => Transport::Tcp,
                attr::IP_TYPE_UDP => Transport::Udp,
                attr::IP_TYPE_MCAST => Transport::Multicast,
                other => bail!("unknown address kind {other}"),
            };
            let ip: IpAddr = a
                .host
                .parse()
                .with_context(|| format!("invalid address host {:?}", a.host))?;
            addresses.push(ListenAddress {
                transport,
                addr: SocketAddr::new(ip, a.port),
            });
        }
        if addresses.is_empty() {
            addresses.push(ListenAddress {
                transport: Transport::Tcp,
                addr: SocketAddr::new(IpAddr::from([0, 0, 0, 0]), constants::TCP_LISTEN_PORT),
            });
        }

        let mut node_heartbeat = HeartbeatConfig {
            period_ms: constants::DEFAULT_NODE_TICK_MS,
            threshold: constants::DEFAULT_NODE_KICKOUT,
        };
        let mut cluster_heartbeat = HeartbeatConfig {
            period_ms: constants::DEFAULT_PEER_TICK_MS,
            threshold: constants::DEFAULT_PEER_KICKOUT,
        };
        for hb in raw.heartbeats {
            let period_ms = resolve_period(hb.period_ms, hb.resolution);
            let target = match hb.scope {
                attr::SCOPE_NODE => &mut node_heartbeat,
                attr::SCOPE_CLUSTER => &mut cluster_heartbeat,
                other => bail!("unknown heartbeat scope {other}"),
            };
            if let Some(period_ms) = period_ms {
                target.period_ms = period_ms;
            }
            if let Some(threshold) = hb.threshold {
                target.threshold = threshold;
            }
        }

        let nodes = raw
            .nodes
            .nodes
            .into_iter()
            .map(|n| {
                Ok(SeedNode {
                    index: n.index,
                    name: n.name,
                    group: n.group,
                    role: role_from_attr(n.role)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let subscriptions = raw
            .subscriptions
            .map(|s| {
                s.subscriptions
                    .into_iter()
                    .map(|s| {
                        Ok(SeedSubscription {
                            kind: subs_type_from_attr(s.sub_type)?,
                            value: s.value,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Config {
            instance: InstanceConfig {
                index: raw.instance.index,
                addresses,
            },
            node_heartbeat,
            cluster_heartbeat,
            nodes,
            subscriptions,
        })
    }
}

fn resolve_period(period: Option<u64>, resolution: Option<u32>) -> Option<u64> {
    let period = period?;
    Some(match resolution {
        Some(attr::RES_SEC) => period * 1000,
        _ => period, // default / RES_MIL_SEC: already milliseconds
    })
}

fn role_from_attr(v: u32) -> Result<Role> {
    Ok(match v {
        0 => Role::None,
        1 => Role::Active,
        2 => Role::Passive,
        other => bail!("unknown node role {other}"),
    })
}

fn subs_type_from_attr(v: u32) -> Result<SubsType> {
    Ok(match v {
        attr::SUBS_TYPE_GROUP => SubsType::Group,
        attr::SUBS_TYPE_PROC => SubsType::Proc,
        attr::SUBS_TYPE_IF => SubsType::If,
        attr::SUBS_TYPE_LOCATION => SubsType::Location,
        attr::SUBS_TYPE_NODE => SubsType::Node,
        other => bail!("unknown subscription type {other}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <hm>
          <instance index="1">
            <address kind="5" scope="8" ip_version="10" host="0.0.0.0" port="32768"/>
          </instance>
          <heartbeat scope="3" period_ms="500" threshold="4"/>
          <heartbeat scope="4" period_ms="2" resolution="2" threshold="5"/>
          <nodes>
            <node index="10" name="worker-a" group="1" role="1"/>
          </nodes>
          <subscriptions>
            <subscription type="12" value="5"/>
          </subscriptions>
        </hm>
    "#;

    #[test]
    fn parses_full_config() {
        let raw: RawConfig = quick_xml::de::from_str(SAMPLE).unwrap();
        let cfg = Config::from_raw(raw).unwrap();
        assert_eq!(cfg.instance.index, 1);
        assert_eq!(cfg.node_heartbeat.period_ms, 500);
        assert_eq!(cfg.node_heartbeat.threshold, 4);
        // scope=cluster, resolution=sec(2): 2s -> 2000ms
        assert_eq!(cfg.cluster_heartbeat.period_ms, 2000);
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.nodes[0].role, Role::Active);
        assert_eq!(cfg.subscriptions.len(), 1);
        assert_eq!(cfg.subscriptions[0].kind, SubsType::Group);
    }

    #[test]
    fn defaults_apply_when_heartbeat_omitted() {
        let raw: RawConfig = quick_xml::de::from_str(
            r#"<hm><instance index="2"></instance><nodes></nodes></hm>"#,
        )
        .unwrap();
        let cfg = Config::from_raw(raw).unwrap();
        assert_eq!(cfg.node_heartbeat.threshold, constants::DEFAULT_NODE_KICKOUT);
        assert_eq!(cfg.instance.addresses.len(), 1);
    }
}
