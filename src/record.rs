use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::StringRecord;
use std::{collections::HashMap, fs::File, io::Read, path::Path};

use crate::{
    clean::{non_empty, parse_date_dayfirst},
    common::scan_progress,
    constants::{DOSE_SLOTS, TEST_SLOTS},
};

/// A (code, name) pair as found in the line-list. Either half may be missing or malformed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceRef {
    pub code: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestSlot {
    pub tipo: Option<String>,
    pub fabricante: Option<String>,
    pub resultado: Option<String>,
    pub estado: Option<String>,
    pub data_coleta: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoseSlot {
    pub data_aplicacao: Option<NaiveDate>,
    pub laboratorio: Option<String>,
    pub lote: Option<String>,
}

/// One line-list row with dates parsed and a surrogate identifier assigned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    /// 1-based row position in the source file.
    pub notificacao_id: i64,
    pub source_id: Option<String>,
    pub data_notificacao: Option<NaiveDate>,
    pub residence: PlaceRef,
    pub notification_place: PlaceRef,
    pub excluido: Option<String>,
    pub validado: Option<String>,

    pub idade: Option<String>,
    pub sexo: Option<String>,
    pub raca_cor: Option<String>,
    pub profissional_saude: Option<String>,
    pub profissional_seguranca: Option<String>,
    pub cbo: Option<String>,
    pub comunidade_tradicional: Option<String>,

    pub data_inicio_sintomas: Option<NaiveDate>,
    pub data_encerramento: Option<NaiveDate>,
    pub classificacao_final: Option<String>,
    pub evolucao_caso: Option<String>,
    pub total_testes_realizados: Option<String>,
    pub outros_sintomas: Option<String>,
    pub outras_condicoes: Option<String>,

    pub codigo_estrategia_covid: Option<String>,
    pub codigo_busca_ativa_assintomatico: Option<String>,
    pub outro_busca_ativa_assintomatico: Option<String>,
    pub codigo_triagem_populacao_especifica: Option<String>,
    pub outro_triagem_populacao_especifica: Option<String>,
    pub codigo_local_realizacao_testagem: Option<String>,
    pub outro_local_realizacao_testagem: Option<String>,

    pub origem: Option<String>,
    pub sintomas: Option<String>,
    pub tests: [TestSlot; TEST_SLOTS],
    pub doses: [DoseSlot; DOSE_SLOTS],
}

/// Dose columns use ordinal words instead of numbers.
const DOSE_COLUMN_SUFFIXES: [&str; DOSE_SLOTS] = ["PrimeiraDose", "SegundaDose"];

/// Header name -> column position. Columns missing from the file read as absent.
struct HeaderIndex {
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    fn new(headers: &StringRecord) -> Self {
        let mut positions = HashMap::with_capacity(headers.len());
        for (idx, header) in headers.iter().enumerate() {
            positions.entry(header.trim().to_string()).or_insert(idx);
        }
        Self { positions }
    }

    fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    fn text(&self, row: &StringRecord, name: &str) -> Option<String> {
        let idx = *self.positions.get(name)?;
        non_empty(row.get(idx))
    }

    fn date(&self, row: &StringRecord, name: &str) -> Option<NaiveDate> {
        let idx = *self.positions.get(name)?;
        parse_date_dayfirst(row.get(idx))
    }
}

pub fn load_records(input_path: &Path, delimiter: char) -> Result<Vec<RawRecord>> {
    let file = File::open(input_path)
        .with_context(|| format!("Failed opening raw notifications {}", input_path.display()))?;
    read_records(file, delimiter)
        .with_context(|| format!("Failed loading raw notifications {}", input_path.display()))
}

pub fn read_records<R: Read>(input: R, delimiter: char) -> Result<Vec<RawRecord>> {
    let delimiter = u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .with_context(|| format!("Delimiter {delimiter:?} must be a single ASCII character"))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(input);
    let headers = reader
        .headers()
        .context("Failed reading CSV header")?
        .clone();
    let index = HeaderIndex::new(&headers);
    for required in ["municipioNotificacaoIBGE", "municipioNotificacao"] {
        if !index.contains(required) {
            tracing::warn!(
                "CSV has no '{required}' column; notifications will fail the municipality check"
            );
        }
    }

    let progress = scan_progress("READ");
    let mut records = Vec::new();
    for (position, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("Failed reading CSV record {}", position + 1))?;
        records.push(parse_row(&index, &row, position as i64 + 1));
        progress.inc(1);
    }
    progress.finish_and_clear();
    Ok(records)
}

fn parse_row(index: &HeaderIndex, row: &StringRecord, notificacao_id: i64) -> RawRecord {
    let tests = std::array::from_fn(|slot| {
        let n = slot + 1;
        TestSlot {
            tipo: index.text(row, &format!("codigoTipoTeste{n}")),
            fabricante: index.text(row, &format!("codigoFabricanteTeste{n}")),
            resultado: index.text(row, &format!("codigoResultadoTeste{n}")),
            estado: index.text(row, &format!("codigoEstadoTeste{n}")),
            data_coleta: index.date(row, &format!("dataColetaTeste{n}")),
        }
    });
    let doses = std::array::from_fn(|slot| {
        let suffix = DOSE_COLUMN_SUFFIXES[slot];
        DoseSlot {
            data_aplicacao: index.date(row, &format!("data{suffix}")),
            laboratorio: index.text(row, &format!("codigoLaboratorio{suffix}")),
            lote: index.text(row, &format!("lote{suffix}")),
        }
    });

    RawRecord {
        notificacao_id,
        source_id: index.text(row, "source_id"),
        data_notificacao: index.date(row, "dataNotificacao"),
        residence: PlaceRef {
            code: index.text(row, "municipioIBGE"),
            name: index.text(row, "municipio"),
        },
        notification_place: PlaceRef {
            code: index.text(row, "municipioNotificacaoIBGE"),
            name: index.text(row, "municipioNotificacao"),
        },
        excluido: index.text(row, "excluido"),
        validado: index.text(row, "validado"),

        idade: index.text(row, "idade"),
        sexo: index.text(row, "sexo"),
        raca_cor: index.text(row, "racaCor"),
        profissional_saude: index.text(row, "profissionalSaude"),
        profissional_seguranca: index.text(row, "profissionalSeguranca"),
        cbo: index.text(row, "cbo"),
        comunidade_tradicional: index.text(row, "codigoContemComunidadeTradicional"),

        data_inicio_sintomas: index.date(row, "dataInicioSintomas"),
        data_encerramento: index.date(row, "dataEncerramento"),
        classificacao_final: index.text(row, "classificacaoFinal"),
        evolucao_caso: index.text(row, "evolucaoCaso"),
        total_testes_realizados: index.text(row, "totalTestesRealizados"),
        outros_sintomas: index.text(row, "outrosSintomas"),
        outras_condicoes: index.text(row, "outrasCondicoes"),

        codigo_estrategia_covid: index.text(row, "codigoEstrategiaCovid"),
        codigo_busca_ativa_assintomatico: index.text(row, "codigoBuscaAtivaAssintomatico"),
        outro_busca_ativa_assintomatico: index.text(row, "outroBuscaAtivaAssintomatico"),
        codigo_triagem_populacao_especifica: index.text(row, "codigoTriagemPopulacaoEspecifica"),
        outro_triagem_populacao_especifica: index.text(row, "outroTriagemPopulacaoEspecifica"),
        codigo_local_realizacao_testagem: index.text(row, "codigoLocalRealizacaoTestagem"),
        outro_local_realizacao_testagem: index.text(row, "outroLocalRealizacaoTestagem"),

        origem: index.text(row, "origem"),
        sintomas: index.text(row, "sintomas"),
        tests,
        doses,
    }
}
