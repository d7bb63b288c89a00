//! Protocol schemes
//!
//! A scheme is one receiver family's concrete protocol: its wire format
//! and its shared variable set, layered on the generic engine. Targets are
//! addressed as `scheme://host:port`.

use crate::error::{AvrError, Result};
use crate::variable::VarDef;

pub mod denon;
pub mod yamaha;

pub use denon::Denon;
pub use yamaha::Yamaha;

/// Default control port (telnet)
pub const DEFAULT_PORT: u16 = 23;

/// A wire-format and variable-set implementation for one receiver family
pub trait Scheme: Send + Sync {
    /// Identifier used in target URIs
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Keep-alive payload sent while connected, if the protocol needs one
    fn pulse(&self) -> Option<String> {
        None
    }

    /// Variable ids polled on every (re)connect
    fn preload(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// The scheme's shared variable declarations
    fn variables(&self) -> Vec<VarDef>;
}

/// Look up a scheme implementation by its URI name
pub fn scheme_for(name: &str) -> Result<Box<dyn Scheme>> {
    match name {
        "denon" => Ok(Box::new(Denon)),
        "yamaha" => Ok(Box::new(Yamaha)),
        other => Err(AvrError::UnknownScheme(other.to_string())),
    }
}

/// Parse a `scheme://host[:port]` target address
pub fn parse_uri(uri: &str) -> Result<(Box<dyn Scheme>, String, u16)> {
    let (name, rest) = uri
        .split_once("://")
        .ok_or_else(|| AvrError::InvalidUri(uri.to_string()))?;
    let scheme = scheme_for(name)?;
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| AvrError::InvalidUri(uri.to_string()))?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(AvrError::InvalidUri(uri.to_string()));
    }
    Ok((scheme, host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uri_forms() {
        let (scheme, host, port) = parse_uri("yamaha://10.0.0.5:50000").unwrap();
        assert_eq!(scheme.name(), "yamaha");
        assert_eq!(host, "10.0.0.5");
        assert_eq!(port, 50000);

        let (scheme, host, port) = parse_uri("denon://avr.local").unwrap();
        assert_eq!(scheme.name(), "denon");
        assert_eq!(host, "avr.local");
        assert_eq!(port, DEFAULT_PORT);

        assert!(matches!(
            parse_uri("bogus://h:1"),
            Err(AvrError::UnknownScheme(_))
        ));
        assert!(matches!(parse_uri("denon"), Err(AvrError::InvalidUri(_))));
        assert!(matches!(
            parse_uri("denon://h:notaport"),
            Err(AvrError::InvalidUri(_))
        ));
    }

    #[test]
    fn shipped_schemes_have_unique_var_ids() {
        for scheme in [scheme_for("denon").unwrap(), scheme_for("yamaha").unwrap()] {
            let defs = scheme.variables();
            let mut ids: Vec<_> = defs.iter().map(|d| d.id.clone()).collect();
            ids.sort();
            let before = ids.len();
            ids.dedup();
            assert_eq!(before, ids.len(), "duplicate id in {}", scheme.name());
        }
    }
}
