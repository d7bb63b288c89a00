//! Denon AVR compatible scheme
//!
//! Wire format is bare command tokens: `PW?` polls power, answered with
//! `PWON` or `PWSTANDBY`. Channel volume is a multi-line block: one
//! `CVxx yy` line per speaker, terminated by the `CVEND` sentinel.

use super::Scheme;
use crate::codec::{ChildCodec, IntCodec, LineCodec, PollCodec, PrefixCodec, TranslationCodec};
use crate::error::Result;
use crate::value::{Value, VarKind};
use crate::variable::{Access, VarDef};
use std::sync::Arc;

fn framed(prefix: PrefixCodec, inner: Arc<dyn LineCodec>) -> Arc<dyn LineCodec> {
    Arc::new(ChildCodec::new(Arc::new(prefix), inner))
}

fn bool_var(id: &str, prefix: &str) -> VarDef {
    VarDef::new(
        id,
        VarKind::Bool,
        framed(
            PrefixCodec::new(prefix),
            Arc::new(TranslationCodec::new([("ON", true), ("OFF", false)])),
        ),
    )
}

fn channel_var(id: &str, channel: &str, name: &str) -> VarDef {
    VarDef::new(
        id,
        VarKind::Int { min: 0, max: 99 },
        framed(
            PrefixCodec::new(format!("CV{} ", channel)),
            Arc::new(IntCodec),
        ),
    )
    .name(name)
    .category("Channel Volume")
    .parent("channel_volume")
}

const SOURCES: &[(&str, &str)] = &[
    ("PHONO", "Phono"),
    ("CD", "CD"),
    ("TUNER", "Tuner"),
    ("DVD", "DVD"),
    ("BD", "Blu-ray"),
    ("TV", "TV"),
    ("SAT/CBL", "CBL/SAT"),
    ("MPLAY", "Media Player"),
    ("GAME", "Game"),
    ("AUX1", "AUX 1"),
    ("AUX2", "AUX 2"),
    ("NET", "Heos Network"),
    ("BT", "Bluetooth"),
    ("USB/IPOD", "USB/iPod"),
];

pub struct Denon;

impl Scheme for Denon {
    fn name(&self) -> &'static str {
        "denon"
    }

    fn description(&self) -> &'static str {
        "Denon/Marantz AVR compatible"
    }

    fn pulse(&self) -> Option<String> {
        Some("PW?".to_string())
    }

    fn preload(&self) -> Vec<&'static str> {
        vec!["power", "volume", "muted", "source"]
    }

    fn variables(&self) -> Vec<VarDef> {
        vec![
            VarDef::new(
                "power",
                VarKind::Bool,
                framed(
                    PrefixCodec::new("PW"),
                    Arc::new(TranslationCodec::new([("ON", true), ("STANDBY", false)])),
                ),
            ),
            VarDef::new(
                "volume",
                VarKind::Int { min: 0, max: 98 },
                framed(
                    PrefixCodec::new("MV").exclude("MVMAX"),
                    Arc::new(IntCodec),
                ),
            )
            .name("Master Volume"),
            bool_var("muted", "MU").name("Muted"),
            {
                let codec = TranslationCodec::new(SOURCES.iter().map(|&(w, v)| (w, v)));
                let options = codec.options();
                VarDef::new(
                    "source",
                    VarKind::Select { options },
                    framed(PrefixCodec::new("SI"), Arc::new(codec)),
                )
            },
            VarDef::new(
                "channel_volume",
                VarKind::Bool,
                Arc::new(PollCodec { poll: "CV?".into() }),
            )
            .name("Channel Volume")
            .category("Channel Volume")
            .block(
                "CVEND",
                ["cv_front_left", "cv_front_right", "cv_center", "cv_subwoofer"],
            ),
            channel_var("cv_front_left", "FL", "Front Left"),
            channel_var("cv_front_right", "FR", "Front Right"),
            channel_var("cv_center", "C", "Center"),
            channel_var("cv_subwoofer", "SW", "Subwoofer"),
            VarDef::new(
                "name",
                VarKind::Select {
                    options: Vec::new(),
                },
                framed(PrefixCodec::new("NSFRN "), Arc::new(FriendlyName)),
            )
            .name("Device Name")
            .access(Access::ReadOnly)
            .default_value("Denon AVR")
            .dummy_value("Denon AVR Dummy"),
        ]
    }
}

/// Free-form friendly-name payload
struct FriendlyName;

impl LineCodec for FriendlyName {
    fn matches(&self, line: &str) -> bool {
        line != "?"
    }

    fn serialize(&self, value: &Value) -> Vec<String> {
        vec![value.to_string()]
    }

    fn unserialize(&self, data: &[String]) -> Result<Value> {
        Ok(Value::Str(data.join("")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, Role};
    use crate::registry::VarRegistry;

    fn engine(role: Role) -> Engine {
        Engine::new(VarRegistry::new(Denon.variables()), role, Vec::new())
    }

    #[test]
    fn power_poll_and_answers() {
        let mut engine = engine(Role::Client);
        let power = engine.registry.lookup("power").unwrap();
        engine.poll_var(power);
        assert_eq!(engine.take_out(), vec!["PW?".to_string()]);
        engine.handle_line("PWON");
        assert_eq!(engine.registry.get(power).value(), Some(&Value::Bool(true)));
    }

    #[test]
    fn volume_ignores_mvmax_report() {
        let mut engine = engine(Role::Client);
        let volume = engine.registry.lookup("volume").unwrap();
        engine.handle_line("MVMAX 86");
        assert_eq!(engine.registry.get(volume).value(), None);
        engine.handle_line("MV45");
        assert_eq!(engine.registry.get(volume).value(), Some(&Value::Int(45)));
    }

    #[test]
    fn source_round_trip() {
        let mut engine = engine(Role::Client);
        let source = engine.registry.lookup("source").unwrap();
        engine.handle_line("SIBD");
        assert_eq!(
            engine.registry.get(source).value(),
            Some(&Value::Str("Blu-ray".to_string()))
        );
        engine
            .remote_set(source, Value::Str("CBL/SAT".to_string()), false)
            .unwrap();
        assert_eq!(engine.take_out(), vec!["SISAT/CBL".to_string()]);
    }

    #[test]
    fn dummy_server_round_trip_through_client() {
        // Server fabricates a value; its reply line decodes on a client
        let mut server = engine(Role::Server);
        server.handle_line("MV?");
        let replies = server.take_out();
        assert_eq!(replies, vec!["MV49".to_string()]);

        let mut client = engine(Role::Client);
        for line in replies {
            client.handle_line(&line);
        }
        let volume = client.registry.lookup("volume").unwrap();
        assert_eq!(client.registry.get(volume).value(), Some(&Value::Int(49)));
    }

    #[test]
    fn block_resend_is_reentrancy_guarded() {
        let mut server = engine(Role::Server);
        server.handle_line("CV?");
        let first = server.take_out();
        assert_eq!(first.last().map(String::as_str), Some("CVEND"));
        assert_eq!(first.len(), 5);

        // A second poll answers again now that the first batch completed
        server.handle_line("CV?");
        assert_eq!(server.take_out().len(), 5);
    }
}
