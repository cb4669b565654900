//! Form-field extraction from plain-text bodies.
//!
//! Website forms arrive as notification mails with one `key: value` line
//! per field. We recover those pairs and render them back in a fixed,
//! readable order.

use indexmap::IndexMap;

/// Separators tried per line, first match wins.
const SEPARATORS: [&str; 6] = [" : ", ": ", ":", " :", " = ", "="];

/// Fields listed first when formatting, in this order.
const FIELD_ORDER: [&str; 14] = [
    "Naam",
    "E-mail",
    "Telefoonnummer",
    "Geboortedatum",
    "Geslacht",
    "Adres",
    "Postcode",
    "Woonplaats",
    "Afstand",
    "Vereniging",
    "Inschrijving_voor",
    "Betaalmethode",
    "lange_tekst",
    "Heb_je_een_vraag_of_opmerking_neem_dan_contact_op_met_ons",
];

/// Split one trimmed line into a field, if any separator yields a
/// non-empty key and value.
fn split_field(line: &str) -> Option<(&str, &str)> {
    SEPARATORS.iter().find_map(|sep| {
        let (key, value) = line.split_once(sep)?;
        let (key, value) = (key.trim(), value.trim());
        (!key.is_empty() && !value.is_empty()).then_some((key, value))
    })
}

/// Extract `key: value` pairs in encounter order.
///
/// A repeated key keeps its first position and takes the last value.
pub fn extract_form_fields(text: &str) -> IndexMap<String, String> {
    let mut fields = IndexMap::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some((key, value)) = split_field(line) {
            fields.insert(key.to_string(), value.to_string());
        }
    }
    fields
}

/// Render fields as `key : value` lines: known fields in the preferred
/// order first, then the rest in encounter order.
pub fn format_form_fields(fields: &IndexMap<String, String>) -> String {
    let preferred = FIELD_ORDER
        .iter()
        .filter_map(|key| fields.get_key_value(*key));
    let remaining = fields
        .iter()
        .filter(|(key, _)| !FIELD_ORDER.contains(&key.as_str()));

    preferred
        .chain(remaining)
        .map(|(key, value)| format!("{key} : {value}"))
        .collect::<Vec<_>>()
        .join("\n")
}


