//! Multi-valued fields exploded into child rows: symptom links, test slots, dose slots.

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

use crate::{clean::clean_code, notification::WorkingSet};

const SYMPTOM_DELIMITER: char = ',';

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymptomExpansion {
    /// Distinct symptom names in first-seen order.
    pub dictionary: Vec<String>,
    /// One (notification, symptom name) pair per token, duplicates included.
    pub mentions: Vec<(i64, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabTestRow {
    pub notificacao_id: i64,
    pub numero_sequencial: i64,
    pub tipo_teste: String,
    pub fabricante_teste: Option<String>,
    pub resultado_teste: Option<String>,
    pub estado_teste: Option<String>,
    pub data_coleta: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaccineDoseRow {
    pub notificacao_id: i64,
    pub dose_numero: i64,
    pub data_aplicacao: NaiveDate,
    pub laboratorio: Option<String>,
    pub lote: Option<String>,
}

pub fn split_symptoms(text: &str) -> impl Iterator<Item = &str> {
    text.split(SYMPTOM_DELIMITER)
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn expand_symptoms(working: &WorkingSet<'_>) -> SymptomExpansion {
    let mut seen = HashSet::new();
    let mut expansion = SymptomExpansion::default();
    for record in working.records() {
        let Some(text) = record.sintomas.as_deref() else {
            continue;
        };
        for token in split_symptoms(text) {
            if seen.insert(token.to_string()) {
                expansion.dictionary.push(token.to_string());
            }
            expansion
                .mentions
                .push((record.notificacao_id, token.to_string()));
        }
    }
    expansion
}

/// Resolves mentions against store-assigned symptom ids. Repeated mentions of the same
/// symptom on one notification collapse into a single link.
pub fn symptom_links(
    mentions: &[(i64, String)],
    symptom_ids: &HashMap<String, i64>,
) -> Vec<(i64, i64)> {
    let mut seen = HashSet::new();
    mentions
        .iter()
        .filter_map(|(notificacao_id, name)| {
            symptom_ids
                .get(name)
                .map(|sintoma_id| (*notificacao_id, *sintoma_id))
        })
        .filter(|link| seen.insert(*link))
        .collect()
}

/// Slot-major concatenation of the four test groups. A slot counts as a test when it
/// carries a test type; the collection date is optional.
pub fn expand_tests(working: &WorkingSet<'_>) -> Vec<LabTestRow> {
    let mut rows = Vec::new();
    for slot in 0..crate::constants::TEST_SLOTS {
        for record in working.records() {
            let test = &record.tests[slot];
            let Some(tipo_teste) = clean_code(test.tipo.as_deref()) else {
                continue;
            };
            rows.push(LabTestRow {
                notificacao_id: record.notificacao_id,
                numero_sequencial: slot as i64 + 1,
                tipo_teste,
                fabricante_teste: clean_code(test.fabricante.as_deref()),
                resultado_teste: clean_code(test.resultado.as_deref()),
                estado_teste: clean_code(test.estado.as_deref()),
                data_coleta: test.data_coleta,
            });
        }
    }
    rows
}

/// Slot-major concatenation of the two dose groups. Without an application date there
/// is no evidence the dose happened, so the slot is skipped.
pub fn expand_doses(working: &WorkingSet<'_>) -> Vec<VaccineDoseRow> {
    let mut rows = Vec::new();
    for slot in 0..crate::constants::DOSE_SLOTS {
        for record in working.records() {
            let dose = &record.doses[slot];
            let Some(data_aplicacao) = dose.data_aplicacao else {
                continue;
            };
            rows.push(VaccineDoseRow {
                notificacao_id: record.notificacao_id,
                dose_numero: slot as i64 + 1,
                data_aplicacao,
                laboratorio: dose.laboratorio.clone(),
                lote: dose.lote.clone(),
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geo::Municipality,
        notification::{MunicipalitySet, select_notifications},
        record::{DoseSlot, PlaceRef, RawRecord, TestSlot},
    };

    fn placed(id: i64) -> RawRecord {
        RawRecord {
            notificacao_id: id,
            notification_place: PlaceRef {
                code: Some("1501402".to_string()),
                name: Some("Belém".to_string()),
            },
            ..RawRecord::default()
        }
    }

    fn municipalities() -> MunicipalitySet {
        MunicipalitySet::from_dimension(&[Municipality {
            code: 1_501_402,
            name: Some("Belém".to_string()),
            state_code: 15,
        }])
    }

    #[test]
    fn symptoms_split_trim_and_deduplicate() {
        let mut first = placed(1);
        first.sintomas = Some("Febre, Tosse,Febre, ".to_string());
        let mut second = placed(2);
        second.sintomas = Some(" Dispneia ,Tosse".to_string());
        let mut dropped = placed(3);
        dropped.notification_place.code = None;
        dropped.sintomas = Some("Coriza".to_string());
        let records = vec![first, second, dropped];

        let (_, working) = select_notifications(&records, &municipalities());
        let expansion = expand_symptoms(&working);
        assert_eq!(expansion.dictionary, vec!["Febre", "Tosse", "Dispneia"]);
        assert_eq!(expansion.mentions.len(), 5);

        let ids: HashMap<String, i64> = [("Febre", 10), ("Tosse", 11), ("Dispneia", 12)]
            .into_iter()
            .map(|(n, id)| (n.to_string(), id))
            .collect();
        let links = symptom_links(&expansion.mentions, &ids);
        assert_eq!(links, vec![(1, 10), (1, 11), (2, 12), (2, 11)]);
    }

    #[test]
    fn tests_need_a_type_but_not_a_date() {
        let mut record = placed(1);
        record.tests[0] = TestSlot {
            tipo: Some("2.0".to_string()),
            resultado: Some("1.0".to_string()),
            ..TestSlot::default()
        };
        record.tests[2] = TestSlot {
            fabricante: Some("7".to_string()),
            data_coleta: NaiveDate::from_ymd_opt(2021, 3, 1),
            ..TestSlot::default()
        };
        record.tests[3] = TestSlot {
            tipo: Some("RT-PCR".to_string()),
            data_coleta: NaiveDate::from_ymd_opt(2021, 3, 2),
            ..TestSlot::default()
        };
        let records = vec![record];
        let (_, working) = select_notifications(&records, &municipalities());

        let rows = expand_tests(&working);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].numero_sequencial, 1);
        assert_eq!(rows[0].tipo_teste, "2");
        assert_eq!(rows[0].resultado_teste.as_deref(), Some("1"));
        assert_eq!(rows[0].data_coleta, None);
        assert_eq!(rows[1].numero_sequencial, 4);
        assert_eq!(rows[1].tipo_teste, "RT-PCR");
    }

    #[test]
    fn doses_need_an_application_date() {
        let mut record = placed(1);
        record.doses[0] = DoseSlot {
            data_aplicacao: NaiveDate::from_ymd_opt(2021, 5, 1),
            laboratorio: Some("Butantan".to_string()),
            lote: Some("A1".to_string()),
        };
        record.doses[1] = DoseSlot {
            data_aplicacao: None,
            laboratorio: Some("Butantan".to_string()),
            lote: None,
        };
        let records = vec![record];
        let (_, working) = select_notifications(&records, &municipalities());

        let rows = expand_doses(&working);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dose_numero, 1);
        assert_eq!(rows[0].laboratorio.as_deref(), Some("Butantan"));
    }
}
