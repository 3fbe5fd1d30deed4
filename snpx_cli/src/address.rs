/*!
Command-line parsing of signal addresses and values.
*/

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use snpx::SignalKind;
use std::str::FromStr;

/// `KIND[start]`, e.g. `DO[12]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalAddress {
    pub kind: SignalKind,
    pub start: u16,
}

impl FromStr for SignalAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let re = Regex::new(r"^\s*([A-Za-z]{2})\s*\[\s*(\d+)\s*\]\s*$")?;
        let caps = re
            .captures(s)
            .ok_or_else(|| anyhow!("expected a signal address like DI[1], got {s:?}"))?;

        let kind = caps[1].parse::<SignalKind>()?;
        let start = caps[2]
            .parse::<u16>()
            .with_context(|| format!("signal index in {s:?} is too large"))?;
        if start == 0 {
            bail!("signal indices start at 1: {s:?}");
        }
        Ok(Self { kind, start })
    }
}

/// Parse `1,0,1` or `true,false,on` into booleans
pub fn parse_bools(text: &str) -> Result<Vec<bool>> {
    text.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| match t.to_ascii_lowercase().as_str() {
            "1" | "true" | "on" => Ok(true),
            "0" | "false" | "off" => Ok(false),
            _ => Err(anyhow!("invalid signal value {t:?}")),
        })
        .collect()
}
