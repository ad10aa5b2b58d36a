use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::error::RpcNodeError;

/// Ordered set of subnets allowed to reach the server.
///
/// IPv4 loopback (`127.0.0.0/8`) and IPv6 loopback (`::1`) are always accepted regardless of
/// configuration. Additional subnets are appended at construction time and never mutated
/// afterwards, so lookups need no locking.
#[derive(Debug, Clone)]
pub struct Acl {
    subnets: Vec<IpNetwork>,
}

impl Acl {
    /// Builds an ACL from `-rpcallowip`-style subnet specifications.
    ///
    /// Each entry may be a bare address (treated as a /32 or /128), CIDR notation
    /// (`10.0.0.0/24`), or a dotted-decimal netmask (`10.0.0.0/255.255.255.0`).
    pub fn from_specs(specs: &[String]) -> Result<Self, RpcNodeError> {
        let mut subnets = Vec::with_capacity(specs.len());
        for spec in specs {
            subnets.push(parse_subnet(spec)?);
        }
        Ok(Self { subnets })
    }

    /// Returns `true` if `peer` is allowed to contact the server.
    pub fn is_allowed(&self, peer: IpAddr) -> bool {
        if is_loopback(peer) {
            return true;
        }
        self.subnets.iter().any(|net| net.contains(peer))
    }
}

fn is_loopback(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Parses a single allow-list entry, accepting CIDR prefix-length notation directly and falling
/// back to dotted-decimal netmask notation (not understood by [`ipnetwork`] on its own).
fn parse_subnet(spec: &str) -> Result<IpNetwork, RpcNodeError> {
    if let Ok(net) = spec.parse::<IpNetwork>() {
        return Ok(net);
    }

    if let Some((host, mask)) = spec.split_once('/') {
        if let Ok(mask_addr) = mask.parse::<IpAddr>() {
            let prefix = netmask_to_prefix(mask_addr)
                .ok_or_else(|| RpcNodeError::InvalidBindAddress(spec.to_string()))?;
            let host: IpAddr = host
                .parse()
                .map_err(|_| RpcNodeError::InvalidBindAddress(spec.to_string()))?;
            return IpNetwork::new(host, prefix)
                .map_err(|e| RpcNodeError::InvalidSubnet(e, spec.to_string()));
        }
    }

    // Bare address: match it alone.
    let host: IpAddr =
        spec.parse().map_err(|_| RpcNodeError::InvalidBindAddress(spec.to_string()))?;
    let prefix = if host.is_ipv4() { 32 } else { 128 };
    IpNetwork::new(host, prefix).map_err(|e| RpcNodeError::InvalidSubnet(e, spec.to_string()))
}

fn netmask_to_prefix(mask: IpAddr) -> Option<u8> {
    match mask {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let leading = bits.leading_ones();
            // A valid netmask is a contiguous run of ones followed by zeros.
            if bits.checked_shl(leading).unwrap_or(0) == 0 { Some(leading as u8) } else { None }
        },
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let leading = bits.leading_ones();
            if bits.checked_shl(leading).unwrap_or(0) == 0 { Some(leading as u8) } else { None }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_always_allowed() {
        let acl = Acl::from_specs(&[]).unwrap();
        assert!(acl.is_allowed("127.0.0.1".parse().unwrap()));
        assert!(acl.is_allowed("::1".parse().unwrap()));
        assert!(!acl.is_allowed("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn cidr_subnet_matches() {
        let acl = Acl::from_specs(&["10.0.0.0/24".to_string()]).unwrap();
        assert!(acl.is_allowed("10.0.0.5".parse().unwrap()));
        assert!(!acl.is_allowed("10.0.1.5".parse().unwrap()));
    }

    #[test]
    fn dotted_netmask_matches() {
        let acl = Acl::from_specs(&["10.0.0.0/255.255.255.0".to_string()]).unwrap();
        assert!(acl.is_allowed("10.0.0.200".parse().unwrap()));
        assert!(!acl.is_allowed("10.0.2.200".parse().unwrap()));
    }

    #[test]
    fn bare_address_matches_only_itself() {
        let acl = Acl::from_specs(&["10.0.0.5".to_string()]).unwrap();
        assert!(acl.is_allowed("10.0.0.5".parse().unwrap()));
        assert!(!acl.is_allowed("10.0.0.6".parse().unwrap()));
    }

    #[test]
    fn invalid_subnet_is_rejected() {
        assert!(Acl::from_specs(&["not-an-address".to_string()]).is_err());
    }
}
