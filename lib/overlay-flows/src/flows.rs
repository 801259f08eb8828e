//! Flow rules

use std::fmt;
use std::net::IpAddr;

/// Bridge port carrying encapsulated traffic to and from peers
pub const TUNNEL_PORT: &str = "ext-vxlan";

/// Bridge port towards local pods
pub const LOCAL_PORT: &str = "ext";

/// Classifies traffic entering the bridge
pub const TABLE_CLASSIFY: u8 = 0;

/// Delivers traffic to local pods
pub const TABLE_LOCAL: u8 = 10;

pub const PRIORITY_DEFAULT: u16 = 0;
pub const PRIORITY_MATCH: u16 = 100;

/// One entry in the bridge flow table
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowRule {
    pub table: u8,
    pub priority: u16,
    /// Comma separated match fields, empty for match-all
    pub matches: String,
    pub actions: String,
}

impl FlowRule {
    pub fn new(table: u8, priority: u16, matches: impl Into<String>, actions: impl Into<String>) -> Self {
        Self {
            table,
            priority,
            matches: matches.into(),
            actions: actions.into(),
        }
    }

    pub fn drop_all(table: u8) -> Self {
        Self::new(table, PRIORITY_DEFAULT, "", "drop")
    }
}

impl fmt::Display for FlowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table={},priority={}", self.table, self.priority)?;
        if !self.matches.is_empty() {
            write!(f, ",{}", self.matches)?;
        }
        write!(f, ",actions={}", self.actions)
    }
}

/// Match on destination address or network for the address family of `addr`
pub fn dst_match(addr: IpAddr, dst: impl fmt::Display) -> String {
    match addr {
        IpAddr::V4(_) => format!("ip,nw_dst={}", dst),
        IpAddr::V6(_) => format!("ipv6,ipv6_dst={}", dst),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            FlowRule::drop_all(TABLE_LOCAL).to_string(),
            "table=10,priority=0,actions=drop"
        );
        let rule = FlowRule::new(
            TABLE_CLASSIFY,
            PRIORITY_MATCH,
            dst_match("10.1.3.0".parse().unwrap(), "10.1.3.0/24"),
            format!("output:{}", TUNNEL_PORT),
        );
        assert_eq!(
            rule.to_string(),
            "table=0,priority=100,ip,nw_dst=10.1.3.0/24,actions=output:ext-vxlan"
        );
    }

    #[test]
    fn test_ipv6_match() {
        assert_eq!(dst_match("fd01::5".parse().unwrap(), "fd01::5"), "ipv6,ipv6_dst=fd01::5");
    }
}
