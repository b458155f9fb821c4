// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Locality-aware holder ordering.
//!
//! Holders are ranked by the number of leading equal bits between their IPv4
//! address and the requester's, so that findkey answers prefer peers on the
//! same rack or subnet.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{anyhow, Context};

/// Number of leading equal bits between two IPv4 addresses.
pub fn lcp_bits4(a: Ipv4Addr, b: Ipv4Addr) -> u32 {
    let x = u32::from(a) ^ u32::from(b);
    x.leading_zeros()
}

fn as_ipv4(addr: IpAddr) -> Option<Ipv4Addr> {
    match addr {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}

/// Sort `ip:port` holder strings by longest common prefix (in bits) of their
/// IPv4 address with `target`, most-local first. Ties break by numeric IP
/// ascending, then by the `ip:port` string. Ports are ignored for ranking but
/// preserved in the returned strings.
pub fn sort_by_lcp_v4(holders: &[String], target: &str) -> anyhow::Result<Vec<String>> {
    let target: IpAddr = target.parse().with_context(|| format!("parse target {target:?}"))?;
    let target = as_ipv4(target).ok_or_else(|| anyhow!("target {target} is not IPv4"))?;

    let mut items = Vec::with_capacity(holders.len());
    for hp in holders {
        let sa: SocketAddr = hp.parse().with_context(|| format!("parse holder {hp:?}"))?;
        let ip = as_ipv4(sa.ip()).ok_or_else(|| anyhow!("holder {hp} is not IPv4"))?;
        items.push((hp.clone(), ip, lcp_bits4(ip, target)));
    }

    items.sort_by(|(ha, ipa, lcpa), (hb, ipb, lcpb)| {
        lcpb.cmp(lcpa).then_with(|| ipa.cmp(ipb)).then_with(|| ha.cmp(hb))
    });

    Ok(items.into_iter().map(|(hp, _, _)| hp).collect())
}

#[cfg(test)]
#[path = "locality_tests.rs"]
mod tests;
