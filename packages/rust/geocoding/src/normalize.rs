//! Provider payload normalization.
//!
//! Each provider has a field-mapping table listing JSON pointer candidates
//! per canonical field, tried in order. Missing fields stay `None`; nothing
//! here fails.

use std::sync::LazyLock;

use courtlink_shared::{AddressFields, ProviderKind};
use regex::Regex;
use serde_json::Value;

/// JSON pointer candidates for each canonical field.
struct FieldMap {
    street_number: &'static [&'static str],
    street: &'static [&'static str],
    city: &'static [&'static str],
    state: &'static [&'static str],
    zip: &'static [&'static str],
    county: &'static [&'static str],
    latitude: &'static [&'static str],
    longitude: &'static [&'static str],
    label: &'static [&'static str],
    /// Fill street/city/state/zip from the label when the payload lacks them.
    parse_label: bool,
}

const NOMINATIM: FieldMap = FieldMap {
    street_number: &["/address/house_number"],
    street: &["/address/road", "/address/pedestrian"],
    city: &[
        "/address/city",
        "/address/town",
        "/address/village",
        "/address/hamlet",
    ],
    state: &["/address/ISO3166-2-lvl4", "/address/state"],
    zip: &["/address/postcode"],
    county: &["/address/county"],
    latitude: &["/lat"],
    longitude: &["/lon"],
    label: &["/display_name"],
    parse_label: false,
};

const POSITIONSTACK: FieldMap = FieldMap {
    street_number: &["/number"],
    street: &["/street", "/name"],
    city: &["/locality", "/administrative_area"],
    state: &["/region_code"],
    zip: &["/postal_code"],
    county: &["/county"],
    latitude: &["/latitude"],
    longitude: &["/longitude"],
    label: &["/label"],
    parse_label: false,
};

const CACHE: FieldMap = FieldMap {
    street_number: &[],
    street: &[],
    city: &[],
    state: &[],
    zip: &[],
    county: &["/county"],
    latitude: &["/latitude"],
    longitude: &["/longitude"],
    label: &["/normalized_address"],
    parse_label: true,
};

fn field_map(kind: ProviderKind) -> &'static FieldMap {
    match kind {
        ProviderKind::Nominatim => &NOMINATIM,
        ProviderKind::Positionstack => &POSITIONSTACK,
        ProviderKind::Cache => &CACHE,
    }
}

/// Map one provider candidate onto canonical address fields.
pub fn normalize(kind: ProviderKind, raw: &Value) -> AddressFields {
    let map = field_map(kind);

    let street = first_text(raw, map.street).map(|street| {
        match first_text(raw, map.street_number) {
            Some(number) if !street.starts_with(&number) => format!("{number} {street}"),
            _ => street,
        }
    });

    let mut fields = AddressFields {
        street,
        city: first_text(raw, map.city),
        state: first_text(raw, map.state).map(|s| state_code(&s)),
        zip: first_text(raw, map.zip),
        county: first_text(raw, map.county),
        latitude: first_number(raw, map.latitude).filter(|v| (-90.0..=90.0).contains(v)),
        longitude: first_number(raw, map.longitude).filter(|v| (-180.0..=180.0).contains(v)),
        label: first_text(raw, map.label),
    };

    if map.parse_label {
        if let Some(parsed) = fields.label.as_deref().map(parse_label) {
            fields.street = fields.street.or(parsed.street);
            fields.city = fields.city.or(parsed.city);
            fields.state = fields.state.or(parsed.state);
            fields.zip = fields.zip.or(parsed.zip);
            fields.county = fields.county.or(parsed.county);
        }
    }
    fields
}

fn first_text(raw: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|p| match raw.pointer(p)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_number(raw: &Value, pointers: &[&str]) -> Option<f64> {
    pointers
        .iter()
        .find_map(|p| match raw.pointer(p)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|v| v.is_finite())
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

#[rustfmt::skip]
const STATES: &[(&str, &str)] = &[
    ("alabama", "AL"), ("alaska", "AK"), ("arizona", "AZ"), ("arkansas", "AR"),
    ("california", "CA"), ("colorado", "CO"), ("connecticut", "CT"), ("delaware", "DE"),
    ("district of columbia", "DC"), ("florida", "FL"), ("georgia", "GA"), ("hawaii", "HI"),
    ("idaho", "ID"), ("illinois", "IL"), ("indiana", "IN"), ("iowa", "IA"),
    ("kansas", "KS"), ("kentucky", "KY"), ("louisiana", "LA"), ("maine", "ME"),
    ("maryland", "MD"), ("massachusetts", "MA"), ("michigan", "MI"), ("minnesota", "MN"),
    ("mississippi", "MS"), ("missouri", "MO"), ("montana", "MT"), ("nebraska", "NE"),
    ("nevada", "NV"), ("new hampshire", "NH"), ("new jersey", "NJ"), ("new mexico", "NM"),
    ("new york", "NY"), ("north carolina", "NC"), ("north dakota", "ND"), ("ohio", "OH"),
    ("oklahoma", "OK"), ("oregon", "OR"), ("pennsylvania", "PA"), ("rhode island", "RI"),
    ("south carolina", "SC"), ("south dakota", "SD"), ("tennessee", "TN"), ("texas", "TX"),
    ("utah", "UT"), ("vermont", "VT"), ("virginia", "VA"), ("washington", "WA"),
    ("west virginia", "WV"), ("wisconsin", "WI"), ("wyoming", "WY"), ("puerto rico", "PR"),
    ("guam", "GU"), ("u.s. virgin islands", "VI"), ("northern mariana islands", "MP"),
    ("american samoa", "AS"),
];

/// Two-letter USPS code for `US-IL`, `il` or `Illinois`. Unknown values pass through.
pub fn state_code(raw: &str) -> String {
    let trimmed = raw.trim();
    let value = trimmed
        .strip_prefix("US-")
        .or_else(|| trimmed.strip_prefix("us-"))
        .unwrap_or(trimmed);
    if value.len() == 2 && value.chars().all(|c| c.is_ascii_alphabetic()) {
        return value.to_ascii_uppercase();
    }
    lookup_state(value)
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

fn lookup_state(name: &str) -> Option<&'static str> {
    let lower = name.trim().to_lowercase();
    STATES.iter().find(|(n, _)| *n == lower).map(|(_, c)| *c)
}

// ---------------------------------------------------------------------------
// Label parsing
// ---------------------------------------------------------------------------

static ZIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}(?:-\d{4})?$").expect("valid regex"));
static STATE_ZIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<state>[A-Za-z]{2}|[A-Za-z. ]+?)(?:\s+(?P<zip>\d{5}(?:-\d{4})?))?$")
        .expect("valid regex")
});

const COUNTRY_SUFFIXES: [&str; 4] = ["united states", "united states of america", "usa", "us"];
const COUNTY_SUFFIXES: [&str; 3] = [" county", " parish", " borough"];

/// Split a one-line address back into components.
///
/// Handles both `"Street, City, ST ZIP, Country"` and the longer
/// `"1, Road, City, X County, State, ZIP, Country"` layout.
pub fn parse_label(label: &str) -> AddressFields {
    let mut parts: Vec<&str> = label
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts
        .last()
        .is_some_and(|p| COUNTRY_SUFFIXES.contains(&p.to_lowercase().as_str()))
    {
        parts.pop();
    }

    let mut fields = AddressFields::default();
    if parts.last().is_some_and(|p| ZIP.is_match(p)) {
        fields.zip = parts.pop().map(str::to_string);
    }

    // The state is the last part that reads as a state, optionally followed by a zip.
    let state_at = parts.iter().rposition(|p| {
        STATE_ZIP.captures(p).is_some_and(|c| {
            let state = &c["state"];
            (state.len() == 2 && parts.len() > 1) || lookup_state(state).is_some()
        })
    });
    let Some(state_at) = state_at.filter(|i| *i > 0) else {
        fields.street = (!parts.is_empty()).then(|| parts.join(", "));
        return fields;
    };

    if let Some(caps) = STATE_ZIP.captures(parts[state_at]) {
        fields.state = Some(state_code(&caps["state"]));
        if let Some(zip) = caps.name("zip") {
            fields.zip = Some(zip.as_str().to_string());
        }
    }

    let mut rest = &parts[..state_at];
    if let Some((last, head)) = rest.split_last() {
        let lower = last.to_lowercase();
        if COUNTY_SUFFIXES.iter().any(|s| lower.ends_with(s)) && !head.is_empty() {
            fields.county = Some(last.to_string());
            rest = head;
        }
    }
    if let Some((city, street)) = rest.split_last() {
        fields.city = Some(city.to_string());
        if !street.is_empty() {
            fields.street = Some(join_street(street));
        }
    }
    fields
}

/// `["1", "Sheriffs Plaza"]` reads as `"1 Sheriffs Plaza"`.
fn join_street(parts: &[&str]) -> String {
    match parts {
        [number, road, tail @ ..] if number.chars().all(|c| c.is_ascii_digit()) => {
            std::iter::once(format!("{number} {road}"))
                .chain(tail.iter().map(|s| s.to_string()))
                .collect::<Vec<_>>()
                .join(", ")
        }
        _ => parts.join(", "),
    }
}
