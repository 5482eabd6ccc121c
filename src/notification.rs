use chrono::NaiveDate;
use std::collections::HashSet;

use crate::{
    clean::clean_boolean,
    geo::{Municipality, coerce_ibge, derive_state_code},
    record::RawRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRow {
    pub notificacao_id: i64,
    pub source_id: Option<String>,
    pub data_notificacao: Option<NaiveDate>,
    pub municipio_notificacao_ibge: i64,
    pub estado_notificacao_ibge: Option<i64>,
    pub excluido: Option<bool>,
    pub validado: Option<bool>,
}

/// Codes of the municipality dimension that actually gets inserted.
#[derive(Debug, Clone, Default)]
pub struct MunicipalitySet {
    codes: HashSet<i64>,
}

impl MunicipalitySet {
    pub fn from_dimension(municipalities: &[Municipality]) -> Self {
        Self {
            codes: municipalities.iter().map(|m| m.code).collect(),
        }
    }

    pub fn contains(&self, code: i64) -> bool {
        self.codes.contains(&code)
    }
}

/// Records whose notification made it into the store. Every satellite and expansion
/// is built from this set and nothing else.
#[derive(Debug)]
pub struct WorkingSet<'a> {
    records: Vec<&'a RawRecord>,
}

impl<'a> WorkingSet<'a> {
    pub fn records(&self) -> impl Iterator<Item = &'a RawRecord> + '_ {
        self.records.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn notification_row(record: &RawRecord) -> NotificationRow {
    let municipio = coerce_ibge(record.notification_place.code.as_deref());
    NotificationRow {
        notificacao_id: record.notificacao_id,
        source_id: record.source_id.clone(),
        data_notificacao: record.data_notificacao,
        municipio_notificacao_ibge: municipio,
        estado_notificacao_ibge: derive_state_code(municipio),
        excluido: clean_boolean(record.excluido.as_deref()),
        validado: clean_boolean(record.validado.as_deref()),
    }
}

/// Foreign-key gate: only notifications placed in a known municipality survive.
/// The exclusion flag is carried through untouched; filtering on it is a read-side concern.
pub fn select_notifications<'a>(
    records: &'a [RawRecord],
    municipalities: &MunicipalitySet,
) -> (Vec<NotificationRow>, WorkingSet<'a>) {
    let mut rows = Vec::new();
    let mut survivors = Vec::new();
    for record in records {
        let row = notification_row(record);
        if !municipalities.contains(row.municipio_notificacao_ibge) {
            continue;
        }
        survivors.push(record);
        rows.push(row);
    }
    (rows, WorkingSet { records: survivors })
}
