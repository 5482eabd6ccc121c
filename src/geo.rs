//! IBGE state/municipality reference data and name-based code recovery.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::{
    clean::parse_number,
    constants::MAX_INVALID_IBGE_CODE,
    record::{PlaceRef, RawRecord},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateInfo {
    pub code: i64,
    pub name: &'static str,
    pub uf: &'static str,
}

const fn state(code: i64, name: &'static str, uf: &'static str) -> StateInfo {
    StateInfo { code, name, uf }
}

pub const STATES: [StateInfo; 27] = [
    state(11, "Rondônia", "RO"),
    state(12, "Acre", "AC"),
    state(13, "Amazonas", "AM"),
    state(14, "Roraima", "RR"),
    state(15, "Pará", "PA"),
    state(16, "Amapá", "AP"),
    state(17, "Tocantins", "TO"),
    state(21, "Maranhão", "MA"),
    state(22, "Piauí", "PI"),
    state(23, "Ceará", "CE"),
    state(24, "Rio Grande do Norte", "RN"),
    state(25, "Paraíba", "PB"),
    state(26, "Pernambuco", "PE"),
    state(27, "Alagoas", "AL"),
    state(28, "Sergipe", "SE"),
    state(29, "Bahia", "BA"),
    state(31, "Minas Gerais", "MG"),
    state(32, "Espírito Santo", "ES"),
    state(33, "Rio de Janeiro", "RJ"),
    state(35, "São Paulo", "SP"),
    state(41, "Paraná", "PR"),
    state(42, "Santa Catarina", "SC"),
    state(43, "Rio Grande do Sul", "RS"),
    state(50, "Mato Grosso do Sul", "MS"),
    state(51, "Mato Grosso", "MT"),
    state(52, "Goiás", "GO"),
    state(53, "Distrito Federal", "DF"),
];

pub fn is_known_state(code: i64) -> bool {
    STATES.iter().any(|s| s.code == code)
}

/// True when the raw value reads as a number above the 99999 threshold.
pub fn is_plausible_code(raw: Option<&str>) -> bool {
    raw.and_then(parse_number)
        .is_some_and(|n| n > MAX_INVALID_IBGE_CODE as f64)
}

/// Integer form of a code column: truncated number, or 0 when the value is absent or not numeric.
pub fn coerce_ibge(raw: Option<&str>) -> i64 {
    raw.and_then(parse_number).map(truncate_code).unwrap_or(0)
}

fn truncate_code(number: f64) -> i64 {
    let truncated = number.trunc();
    if truncated < i64::MIN as f64 || truncated > i64::MAX as f64 {
        return 0;
    }
    truncated as i64
}

/// Owning state of a municipality code: its two leading decimal digits.
///
/// Only defined above the 99999 threshold, where the code has at least six digits.
/// Longer codes still yield their two leading digits; the caller decides whether the
/// result is a real state.
pub fn derive_state_code(code: i64) -> Option<i64> {
    if code <= MAX_INVALID_IBGE_CODE {
        return None;
    }
    let mut leading = code;
    while leading >= 100 {
        leading /= 10;
    }
    Some(leading)
}

/// Read-only name -> code lookup built from every row that pairs a place name with a
/// numeric code. Notification-context evidence overrides residence-context evidence.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationTable {
    lookup: HashMap<String, i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub residence_codes_recovered: usize,
    pub notification_codes_recovered: usize,
}

impl ReconciliationTable {
    pub fn build(records: &[RawRecord]) -> Self {
        let residence = first_code_per_name(records.iter().map(|r| &r.residence));
        let notification = first_code_per_name(records.iter().map(|r| &r.notification_place));

        let mut lookup = residence;
        lookup.extend(notification);
        Self { lookup }
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.lookup.get(name).copied()
    }

    /// Patches each (code, name) pair independently: plausible codes stay, otherwise a
    /// known name supplies the code, otherwise the value is left untouched.
    pub fn reconcile(&self, records: &mut [RawRecord]) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        for record in records.iter_mut() {
            if self.heal(&mut record.residence) {
                stats.residence_codes_recovered += 1;
            }
            if self.heal(&mut record.notification_place) {
                stats.notification_codes_recovered += 1;
            }
        }
        stats
    }

    /// Returns true when the pair ends up with a plausible code it did not have before.
    fn heal(&self, place: &mut PlaceRef) -> bool {
        if is_plausible_code(place.code.as_deref()) {
            return false;
        }
        let Some(code) = place.name.as_deref().and_then(|name| self.get(name)) else {
            return false;
        };
        place.code = Some(code.to_string());
        code > MAX_INVALID_IBGE_CODE
    }
}

fn first_code_per_name<'a>(places: impl Iterator<Item = &'a PlaceRef>) -> HashMap<String, i64> {
    let mut out = HashMap::new();
    for place in places {
        let (Some(name), Some(code)) = (place.name.as_deref(), place.code.as_deref()) else {
            continue;
        };
        let Some(number) = parse_number(code) else {
            continue;
        };
        out.entry(name.to_string())
            .or_insert_with(|| truncate_code(number));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Municipality {
    pub code: i64,
    pub name: Option<String>,
    pub state_code: i64,
}

/// Municipality dimension: residence pairs then notification pairs, first occurrence per
/// integer code wins, kept only when the code clears the threshold and its state is known.
pub fn build_municipalities(records: &[RawRecord]) -> Vec<Municipality> {
    let pairs = records
        .iter()
        .map(|r| &r.residence)
        .chain(records.iter().map(|r| &r.notification_place));

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for place in pairs {
        let code = coerce_ibge(place.code.as_deref());
        if !seen.insert(code) {
            continue;
        }
        let Some(state_code) = derive_state_code(code).filter(|s| is_known_state(*s)) else {
            continue;
        };
        out.push(Municipality {
            code,
            name: place.name.clone(),
            state_code,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn place(code: Option<&str>, name: Option<&str>) -> PlaceRef {
        PlaceRef {
            code: code.map(str::to_string),
            name: name.map(str::to_string),
        }
    }

    fn record(id: i64, residence: PlaceRef, notification_place: PlaceRef) -> RawRecord {
        RawRecord {
            notificacao_id: id,
            residence,
            notification_place,
            ..RawRecord::default()
        }
    }

    #[test]
    fn state_table_is_complete_and_unique() {
        let codes: HashSet<i64> = STATES.iter().map(|s| s.code).collect();
        assert_eq!(codes.len(), 27);
        assert!(is_known_state(15));
        assert!(!is_known_state(34));
    }

    #[test]
    fn state_derivation_uses_leading_digits() {
        assert_eq!(derive_state_code(1_507_300), Some(15));
        assert_eq!(derive_state_code(150_730), Some(15));
        assert_eq!(derive_state_code(100_000), Some(10));
        assert_eq!(derive_state_code(99_999), None);
        assert_eq!(derive_state_code(0), None);
    }

    #[test]
    fn coercion_truncates_and_zeroes_garbage() {
        assert_eq!(coerce_ibge(Some("1507300.0")), 1_507_300);
        assert_eq!(coerce_ibge(Some("abc")), 0);
        assert_eq!(coerce_ibge(None), 0);
    }

    #[test]
    fn tucurui_residence_is_healed_from_notification_evidence() {
        let mut records = vec![
            record(1, place(None, Some("Tucuruí")), place(Some("1501402"), Some("Belém"))),
            record(
                2,
                place(Some("1501402"), Some("Belém")),
                place(Some("1507300"), Some("Tucuruí")),
            ),
        ];
        let table = ReconciliationTable::build(&records);
        let stats = table.reconcile(&mut records);

        assert_eq!(records[0].residence.code.as_deref(), Some("1507300"));
        assert_eq!(stats.residence_codes_recovered, 1);
        assert_eq!(stats.notification_codes_recovered, 0);
    }

    #[test]
    fn notification_evidence_wins_name_collisions() {
        let records = vec![
            record(1, place(Some("1500000"), Some("Xinguara")), place(None, None)),
            record(2, place(None, None), place(Some("1508126"), Some("Xinguara"))),
        ];
        let table = ReconciliationTable::build(&records);
        assert_eq!(table.get("Xinguara"), Some(1_508_126));
    }

    #[test]
    fn first_occurrence_wins_within_a_context() {
        let records = vec![
            record(1, place(Some("1500107"), Some("Abaetetuba")), place(None, None)),
            record(2, place(Some("1599999"), Some("Abaetetuba")), place(None, None)),
        ];
        let table = ReconciliationTable::build(&records);
        assert_eq!(table.get("Abaetetuba"), Some(1_500_107));
    }

    #[test]
    fn small_codes_are_replaced_and_unknown_names_left_alone() {
        let mut records = vec![
            record(1, place(Some("0"), Some("Belém")), place(Some("12345"), Some("Nowhere"))),
            record(2, place(Some("1501402"), Some("Belém")), place(None, None)),
        ];
        let table = ReconciliationTable::build(&records);
        let stats = table.reconcile(&mut records);
        // "Belém" first maps to 0 (first occurrence, numeric), so the small code stays small.
        assert_eq!(records[0].residence.code.as_deref(), Some("0"));
        assert_eq!(records[0].notification_place.code.as_deref(), Some("12345"));
        assert_eq!(stats, ReconcileStats::default());
    }

    #[test]
    fn municipalities_are_deduplicated_and_validated() {
        let records = vec![
            record(
                1,
                place(Some("1507300.0"), Some("Tucuruí")),
                place(Some("1501402"), Some("Belém")),
            ),
            record(2, place(Some("1507300"), Some("Tucurui")), place(Some("999"), Some("Lixo"))),
            record(3, place(Some("3412345"), Some("Sem UF")), place(Some("abc"), None)),
        ];
        let municipalities = build_municipalities(&records);
        assert_eq!(
            municipalities,
            vec![
                Municipality {
                    code: 1_507_300,
                    name: Some("Tucuruí".to_string()),
                    state_code: 15,
                },
                Municipality {
                    code: 1_501_402,
                    name: Some("Belém".to_string()),
                    state_code: 15,
                },
            ]
        );
    }

    fn arb_code() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            Just(None::<String>),
            (0i64..10_000_000).prop_map(|n| Some(n.to_string())),
            (0i64..10_000_000).prop_map(|n| Some(format!("{n}.0"))),
            "[A-Z]{1,3}".prop_map(Some),
        ]
    }

    fn arb_name() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            Just(None::<String>),
            prop::sample::select(vec!["Belém", "Tucuruí", "Marabá", "Santarém"])
                .prop_map(|s| Some(s.to_string())),
        ]
    }

    fn arb_records() -> impl Strategy<Value = Vec<RawRecord>> {
        prop::collection::vec((arb_code(), arb_name(), arb_code(), arb_name()), 0..40).prop_map(
            |rows| {
                rows.into_iter()
                    .enumerate()
                    .map(|(i, (rc, rn, nc, nn))| RawRecord {
                        notificacao_id: i as i64 + 1,
                        residence: PlaceRef {
                            code: rc,
                            name: rn,
                        },
                        notification_place: PlaceRef {
                            code: nc,
                            name: nn,
                        },
                        ..RawRecord::default()
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn plausible_codes_survive_reconciliation(records in arb_records()) {
            let mut patched = records.clone();
            ReconciliationTable::build(&records).reconcile(&mut patched);
            for (before, after) in records.iter().zip(&patched) {
                for (b, a) in [
                    (&before.residence, &after.residence),
                    (&before.notification_place, &after.notification_place),
                ] {
                    if is_plausible_code(b.code.as_deref()) {
                        prop_assert_eq!(&b.code, &a.code);
                    }
                }
            }
        }

        #[test]
        fn invalid_codes_with_known_names_take_the_lookup(records in arb_records()) {
            let table = ReconciliationTable::build(&records);
            let mut patched = records.clone();
            table.reconcile(&mut patched);
            for (before, after) in records.iter().zip(&patched) {
                for (b, a) in [
                    (&before.residence, &after.residence),
                    (&before.notification_place, &after.notification_place),
                ] {
                    if is_plausible_code(b.code.as_deref()) {
                        continue;
                    }
                    match b.name.as_deref().and_then(|n| table.get(n)) {
                        Some(code) => prop_assert_eq!(a.code.clone(), Some(code.to_string())),
                        None => prop_assert_eq!(&a.code, &b.code),
                    }
                }
            }
        }

        #[test]
        fn every_municipality_belongs_to_its_leading_digit_state(records in arb_records()) {
            for municipality in build_municipalities(&records) {
                prop_assert!(municipality.code > MAX_INVALID_IBGE_CODE);
                prop_assert_eq!(
                    derive_state_code(municipality.code),
                    Some(municipality.state_code)
                );
                prop_assert!(is_known_state(municipality.state_code));
            }
        }
    }
}
