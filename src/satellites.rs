//! One-to-one extensions of a notification. Each is a projection of the working set.

use chrono::NaiveDate;

use crate::{
    clean::{clean_code, parse_integer},
    geo::{coerce_ibge, derive_state_code},
    notification::{MunicipalitySet, WorkingSet},
    record::RawRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemographicsRow {
    pub notificacao_id: i64,
    pub idade: Option<i64>,
    pub sexo: Option<String>,
    pub raca_cor: Option<String>,
    pub is_profissional_saude: Option<String>,
    pub is_profissional_seguranca: Option<String>,
    pub cbo: Option<String>,
    pub pertence_comunidade_tradicional: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClinicalRow {
    pub notificacao_id: i64,
    pub data_inicio_sintomas: Option<NaiveDate>,
    pub data_encerramento: Option<NaiveDate>,
    pub classificacao_final: Option<String>,
    pub evolucao_caso: Option<String>,
    pub total_testes_realizados: Option<i64>,
    pub outros_sintomas: Option<String>,
    pub outras_condicoes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyRow {
    pub notificacao_id: i64,
    pub codigo_estrategia_covid: Option<String>,
    pub codigo_busca_ativa_assintomatico: Option<String>,
    pub outro_busca_ativa_assintomatico: Option<String>,
    pub codigo_triagem_populacao_especifica: Option<String>,
    pub outro_triagem_populacao_especifica: Option<String>,
    pub codigo_local_realizacao_testagem: Option<String>,
    pub outro_local_realizacao_testagem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpidemiologicalRow {
    pub notificacao_id: i64,
    pub origem_dados: Option<String>,
    pub municipio_residencia_ibge: Option<i64>,
    pub estado_residencia_ibge: Option<i64>,
}

/// The line-list codes traditional-community membership as 1 (no) / 2 (yes).
fn traditional_community(value: Option<&str>) -> Option<bool> {
    match clean_code(value).as_deref() {
        Some("2") => Some(true),
        Some("1") => Some(false),
        _ => None,
    }
}

pub fn demographics_row(record: &RawRecord) -> DemographicsRow {
    DemographicsRow {
        notificacao_id: record.notificacao_id,
        idade: parse_integer(record.idade.as_deref()),
        sexo: record.sexo.clone(),
        raca_cor: record.raca_cor.clone(),
        is_profissional_saude: record.profissional_saude.clone(),
        is_profissional_seguranca: record.profissional_seguranca.clone(),
        cbo: record.cbo.clone(),
        pertence_comunidade_tradicional: traditional_community(
            record.comunidade_tradicional.as_deref(),
        ),
    }
}

pub fn clinical_row(record: &RawRecord) -> ClinicalRow {
    ClinicalRow {
        notificacao_id: record.notificacao_id,
        data_inicio_sintomas: record.data_inicio_sintomas,
        data_encerramento: record.data_encerramento,
        classificacao_final: record.classificacao_final.clone(),
        evolucao_caso: record.evolucao_caso.clone(),
        total_testes_realizados: parse_integer(record.total_testes_realizados.as_deref()),
        outros_sintomas: record.outros_sintomas.clone(),
        outras_condicoes: record.outras_condicoes.clone(),
    }
}

pub fn strategy_row(record: &RawRecord) -> StrategyRow {
    StrategyRow {
        notificacao_id: record.notificacao_id,
        codigo_estrategia_covid: clean_code(record.codigo_estrategia_covid.as_deref()),
        codigo_busca_ativa_assintomatico: clean_code(
            record.codigo_busca_ativa_assintomatico.as_deref(),
        ),
        outro_busca_ativa_assintomatico: record.outro_busca_ativa_assintomatico.clone(),
        codigo_triagem_populacao_especifica: clean_code(
            record.codigo_triagem_populacao_especifica.as_deref(),
        ),
        outro_triagem_populacao_especifica: record.outro_triagem_populacao_especifica.clone(),
        codigo_local_realizacao_testagem: clean_code(
            record.codigo_local_realizacao_testagem.as_deref(),
        ),
        outro_local_realizacao_testagem: record.outro_local_realizacao_testagem.clone(),
    }
}

/// Residence may be unknown: an unlisted code nulls the municipality and state together.
pub fn epidemiological_row(
    record: &RawRecord,
    municipalities: &MunicipalitySet,
) -> EpidemiologicalRow {
    let code = coerce_ibge(record.residence.code.as_deref());
    let (municipio, estado) = if municipalities.contains(code) {
        (Some(code), derive_state_code(code))
    } else {
        (None, None)
    };
    EpidemiologicalRow {
        notificacao_id: record.notificacao_id,
        origem_dados: record.origem.clone(),
        municipio_residencia_ibge: municipio,
        estado_residencia_ibge: estado,
    }
}

pub fn demographics(working: &WorkingSet<'_>) -> Vec<DemographicsRow> {
    working.records().map(demographics_row).collect()
}

pub fn clinical(working: &WorkingSet<'_>) -> Vec<ClinicalRow> {
    working.records().map(clinical_row).collect()
}

pub fn strategy(working: &WorkingSet<'_>) -> Vec<StrategyRow> {
    working.records().map(strategy_row).collect()
}

pub fn epidemiological(
    working: &WorkingSet<'_>,
    municipalities: &MunicipalitySet,
) -> Vec<EpidemiologicalRow> {
    working
        .records()
        .map(|record| epidemiological_row(record, municipalities))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geo::Municipality, record::PlaceRef};

    fn municipalities() -> MunicipalitySet {
        MunicipalitySet::from_dimension(&[Municipality {
            code: 1_507_300,
            name: Some("Tucuruí".to_string()),
            state_code: 15,
        }])
    }

    #[test]
    fn strategy_codes_are_cleaned_and_free_text_kept() {
        let record = RawRecord {
            notificacao_id: 9,
            codigo_estrategia_covid: Some("1.0".to_string()),
            codigo_local_realizacao_testagem: Some("UBS".to_string()),
            outro_local_realizacao_testagem: Some("Escola 2.0".to_string()),
            ..RawRecord::default()
        };
        let row = strategy_row(&record);
        assert_eq!(row.codigo_estrategia_covid.as_deref(), Some("1"));
        assert_eq!(row.codigo_local_realizacao_testagem.as_deref(), Some("UBS"));
        assert_eq!(row.outro_local_realizacao_testagem.as_deref(), Some("Escola 2.0"));
        assert_eq!(row.codigo_busca_ativa_assintomatico, None);
    }

    #[test]
    fn traditional_community_codes_become_flags() {
        assert_eq!(traditional_community(Some("2.0")), Some(true));
        assert_eq!(traditional_community(Some("1")), Some(false));
        assert_eq!(traditional_community(Some("3")), None);
        assert_eq!(traditional_community(None), None);
    }

    #[test]
    fn demographics_coerce_age() {
        let record = RawRecord {
            notificacao_id: 1,
            idade: Some("34.0".to_string()),
            sexo: Some("Feminino".to_string()),
            ..RawRecord::default()
        };
        let row = demographics_row(&record);
        assert_eq!(row.idade, Some(34));
        assert_eq!(row.sexo.as_deref(), Some("Feminino"));
    }

    #[test]
    fn unknown_residence_is_nulled_in_tandem() {
        let known = RawRecord {
            notificacao_id: 1,
            residence: PlaceRef {
                code: Some("1507300".to_string()),
                name: None,
            },
            ..RawRecord::default()
        };
        let unknown = RawRecord {
            notificacao_id: 2,
            residence: PlaceRef {
                code: Some("1599999".to_string()),
                name: None,
            },
            origem: Some("e-SUS".to_string()),
            ..RawRecord::default()
        };

        let row = epidemiological_row(&known, &municipalities());
        assert_eq!(row.municipio_residencia_ibge, Some(1_507_300));
        assert_eq!(row.estado_residencia_ibge, Some(15));

        let row = epidemiological_row(&unknown, &municipalities());
        assert_eq!(row.municipio_residencia_ibge, None);
        assert_eq!(row.estado_residencia_ibge, None);
        assert_eq!(row.origem_dados.as_deref(), Some("e-SUS"));
    }
}
