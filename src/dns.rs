use dns_lookup::lookup_host;
use std::net::IpAddr;

/// Which address family the user asked for on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FamilyPreference {
    /// Prefer IPv4, fall back to IPv6.
    #[default]
    Any,
    V4Only,
    V6Only,
}

impl FamilyPreference {
    fn accepts(self, addr: &IpAddr) -> bool {
        match self {
            FamilyPreference::Any => true,
            FamilyPreference::V4Only => addr.is_ipv4(),
            FamilyPreference::V6Only => addr.is_ipv6(),
        }
    }
}

pub async fn resolve_destination(target: &str, preference: FamilyPreference) -> anyhow::Result<IpAddr> {
    // Literal addresses skip the resolver but still honour the preference
    if let Ok(ip) = target.parse::<IpAddr>() {
        if !preference.accepts(&ip) {
            return Err(anyhow::anyhow!("{} does not match the requested address family", ip));
        }
        return Ok(ip);
    }

    let addresses = tokio::task::spawn_blocking({
        let target = target.to_string();
        move || lookup_host(&target)
    })
    .await??;

    pick_address(addresses, preference)
        .ok_or_else(|| anyhow::anyhow!("no suitable address found for {}", target))
}

fn pick_address(addresses: Vec<IpAddr>, preference: FamilyPreference) -> Option<IpAddr> {
    let candidates: Vec<IpAddr> = addresses
        .into_iter()
        .filter(|addr| preference.accepts(addr))
        .collect();

    candidates
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
}
