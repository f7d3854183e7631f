use crate::error::ParseError;
use crate::mapping::{parse_float, parse_int, present};
use crate::models::SolarReading;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Decode the inverter's `real_time_data.xml`.
///
/// The document is a flat list of tags under the root element. Only a
/// document that is not well-formed XML is an error; unknown tags are ignored
/// and missing tags, `-` and non-numeric values all end up as `None`.
pub fn parse_solar(body: &[u8], ts: DateTime<Utc>) -> Result<SolarReading, ParseError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| ParseError::Malformed(format!("body is not valid UTF-8: {}", e)))?;
    let text = text.trim_start_matches('\u{feff}');
    let doc = roxmltree::Document::parse(text)
        .map_err(|e| ParseError::Malformed(format!("invalid XML: {}", e)))?;

    let tags = Tags::from_root(doc.root_element());
    debug!(tags = tags.values.len(), "inverter document decoded");

    Ok(SolarReading {
        ts,
        state: tags.text("state"),
        vac_l1: tags.float("Vac_l1"),
        vac_l2: tags.float("Vac_l2"),
        vac_l3: tags.float("Vac_l3"),
        iac_l1: tags.float("Iac_l1"),
        iac_l2: tags.float("Iac_l2"),
        iac_l3: tags.float("Iac_l3"),
        freq1: tags.float("Freq1"),
        freq2: tags.float("Freq2"),
        freq3: tags.float("Freq3"),
        pac1: tags.int("pac1"),
        pac2: tags.int("pac2"),
        pac3: tags.int("pac3"),
        p_ac: tags.int("p-ac"),
        temp: tags.float("temp"),
        e_today: tags.float("e-today"),
        t_today: tags.float("t-today"),
        e_total: tags.float("e-total"),
        co2: tags.float("CO2"),
        t_total: tags.float("t-total"),
        v_pv1: tags.float("v-pv1"),
        v_pv2: tags.float("v-pv2"),
        v_pv3: tags.float("v-pv3"),
        v_bus: tags.float("v-bus"),
        max_power: tags.int("maxPower"),
        i_pv11: tags.float("i-pv11"),
        i_pv12: tags.float("i-pv12"),
        i_pv13: tags.float("i-pv13"),
        i_pv14: tags.float("i-pv14"),
        i_pv21: tags.float("i-pv21"),
        i_pv22: tags.float("i-pv22"),
        i_pv23: tags.float("i-pv23"),
        i_pv24: tags.float("i-pv24"),
        i_pv31: tags.float("i-pv31"),
        i_pv32: tags.float("i-pv32"),
        i_pv33: tags.float("i-pv33"),
        i_pv34: tags.float("i-pv34"),
    })
}

/// Text content of the root's direct children, first occurrence per tag.
struct Tags<'a> {
    values: HashMap<&'a str, &'a str>,
}

impl<'a> Tags<'a> {
    fn from_root(root: roxmltree::Node<'a, 'a>) -> Self {
        let mut values = HashMap::new();
        for child in root.children().filter(|n| n.is_element()) {
            values
                .entry(child.tag_name().name())
                .or_insert_with(|| child.text().unwrap_or(""));
        }
        Self { values }
    }

    fn text(&self, tag: &str) -> Option<String> {
        self.values
            .get(tag)
            .and_then(|raw| present(raw))
            .map(str::to_string)
    }

    fn float(&self, tag: &str) -> Option<f64> {
        let raw = self.values.get(tag)?;
        parse_float(raw).unwrap_or_else(|value| {
            warn!(tag, %value, "ignoring non-numeric inverter value");
            None
        })
    }

    fn int(&self, tag: &str) -> Option<i64> {
        let raw = self.values.get(tag)?;
        parse_int(raw).unwrap_or_else(|value| {
            warn!(tag, %value, "ignoring non-numeric inverter value");
            None
        })
    }
}
