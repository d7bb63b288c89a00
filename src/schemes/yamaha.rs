//! Yamaha AVR compatible scheme
//!
//! Wire format `@ZONE:FUNCTION=VALUE`; a value of `?` polls. Example:
//! `@MAIN:PWR=?` is answered with `@MAIN:PWR=On` or `@MAIN:PWR=Standby`.

use super::Scheme;
use crate::codec::{ChildCodec, DecimalCodec, LineCodec, TranslationCodec};
use crate::error::Result;
use crate::value::{Value, VarKind};
use crate::variable::{Access, VarDef};
use std::sync::Arc;

/// Frames one `@ZONE:FUNCTION=` field
pub struct FunctionFrame {
    zone: String,
    function: String,
}

impl FunctionFrame {
    pub fn new(zone: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            function: function.into(),
        }
    }

    fn code(&self, value: &str) -> String {
        format!("@{}:{}={}", self.zone, self.function, value)
    }
}

impl LineCodec for FunctionFrame {
    fn matches(&self, line: &str) -> bool {
        line.starts_with(&self.code(""))
    }

    fn poll_cmd(&self) -> Option<String> {
        Some(self.code("?"))
    }

    fn serialize(&self, value: &Value) -> Vec<String> {
        vec![self.code(&value.to_string())]
    }

    fn unserialize(&self, data: &[String]) -> Result<Value> {
        let line = data.first().map(String::as_str).unwrap_or_default();
        let payload = line.split_once('=').map(|(_, v)| v).unwrap_or(line);
        Ok(Value::Str(payload.to_string()))
    }
}

fn var(
    id: &str,
    zone: &str,
    function: &str,
    kind: VarKind,
    inner: Arc<dyn LineCodec>,
) -> VarDef {
    let codec = Arc::new(ChildCodec::new(
        Arc::new(FunctionFrame::new(zone, function)),
        inner,
    ));
    VarDef::new(id, kind, codec)
}

fn bool_var(id: &str, zone: &str, function: &str) -> VarDef {
    var(
        id,
        zone,
        function,
        VarKind::Bool,
        Arc::new(TranslationCodec::new([("On", true), ("Off", false)])),
    )
}

fn select_var(id: &str, zone: &str, function: &str, translation: &[(&str, &str)]) -> VarDef {
    let codec = TranslationCodec::new(translation.iter().map(|&(w, v)| (w, v)));
    let options = codec.options();
    var(
        id,
        zone,
        function,
        VarKind::Select { options },
        Arc::new(codec),
    )
}

fn tone_var(id: &str, function: &str) -> VarDef {
    var(
        id,
        "MAIN",
        function,
        VarKind::Decimal {
            min: -6.0,
            max: 6.0,
            step: 0.5,
        },
        Arc::new(DecimalCodec { decimals: 1 }),
    )
}

fn power_var(id: &str, zone: &str) -> VarDef {
    var(
        id,
        zone,
        "PWR",
        VarKind::Bool,
        Arc::new(TranslationCodec::new([("On", true), ("Standby", false)])),
    )
}

const SOURCES: &[(&str, &str)] = &[
    ("TUNER", "Tuner"),
    ("PHONO", "Phono"),
    ("HDMI1", "HDMI 1"),
    ("HDMI2", "HDMI 2"),
    ("HDMI3", "HDMI 3"),
    ("HDMI4", "HDMI 4"),
    ("HDMI5", "HDMI 5"),
    ("AV1", "AV 1"),
    ("AV2", "AV 2"),
    ("AV3", "AV 3"),
    ("AV4", "AV 4"),
    ("V-AUX", "V-AUX"),
    ("AUDIO1", "Audio 1"),
    ("AUDIO2", "Audio 2"),
    ("Bluetooth", "Bluetooth"),
    ("NET", "Net"),
    ("NET RADIO", "Net Radio"),
    ("PC", "PC"),
];

pub struct Yamaha;

impl Scheme for Yamaha {
    fn name(&self) -> &'static str {
        "yamaha"
    }

    fn description(&self) -> &'static str {
        "Yamaha AVR compatible"
    }

    fn pulse(&self) -> Option<String> {
        Some("@MAIN:PWR=?".to_string())
    }

    fn preload(&self) -> Vec<&'static str> {
        vec!["power", "main_power", "volume", "muted", "source"]
    }

    fn variables(&self) -> Vec<VarDef> {
        let mut defs = vec![power_var("power", "SYS")];

        for (zone, zone_id, zone_name) in [("MAIN", "", "Main Zone"), ("ZONE2", "zone2_", "Zone 2")]
        {
            defs.push(
                power_var(&format!("{}_power", zone.to_lowercase()), zone).category(zone_name),
            );
            defs.push(
                var(
                    &format!("{}volume", zone_id),
                    zone,
                    "VOL",
                    VarKind::Decimal {
                        min: -80.5,
                        max: 16.5,
                        step: 0.5,
                    },
                    Arc::new(DecimalCodec { decimals: 1 }),
                )
                .category(zone_name),
            );
            defs.push(bool_var(&format!("{}muted", zone_id), zone, "MUTE").category(zone_name));
            defs.push(
                select_var(&format!("{}source", zone_id), zone, "INP", SOURCES)
                    .category(zone_name),
            );
        }

        defs.push(select_var(
            "scene",
            "MAIN",
            "SCENE",
            &[
                ("Scene 1", "Scene 1"),
                ("Scene 2", "Scene 2"),
                ("Scene 3", "Scene 3"),
                ("Scene 4", "Scene 4"),
            ],
        ));
        defs.push(tone_var("bass", "SPBASS"));
        defs.push(tone_var("treble", "SPTREBLE"));
        defs.push(bool_var("pure_direct_mode", "MAIN", "PUREDIRMODE"));
        defs.push(bool_var("hdmi_out", "MAIN", "HDMIOUT"));

        // Cursor and menu only travel client-to-server
        defs.push(
            select_var(
                "cursor",
                "MAIN",
                "LISTCURSOR",
                &[
                    ("Down", "Down"),
                    ("Up", "Up"),
                    ("Left", "Left"),
                    ("Right", "Right"),
                    ("Sel", "Select"),
                    ("Back", "Back"),
                    ("Back to Home", "Home"),
                ],
            )
            .access(Access::WriteOnly),
        );
        defs.push(
            select_var(
                "menu",
                "MAIN",
                "LISTMENU",
                &[
                    ("On Screen", "On Screen"),
                    ("Top Menu", "Top Menu"),
                    ("Menu", "Menu"),
                    ("Option", "Option"),
                ],
            )
            .access(Access::WriteOnly),
        );

        defs.push(
            var(
                "name",
                "SYS",
                "MODELNAME",
                VarKind::Select {
                    options: Vec::new(),
                },
                Arc::new(ModelName),
            )
            .access(Access::ReadOnly)
            .default_value("Yamaha")
            .dummy_value("Yamaha RX-V771 Dummy"),
        );

        defs
    }
}

/// Free-form model name payload
struct ModelName;

impl LineCodec for ModelName {
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
