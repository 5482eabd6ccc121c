//! Flattened, analysis-ready dataset read back out of the normalized store.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use csv::WriterBuilder;
use rusqlite::Connection;
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashSet},
    fs::File,
    io::Write,
    path::Path,
};

use crate::{
    args::ExportArgs,
    common::{ensure_parent_dir, lowercase_extension, move_into_place, tmp_path_for},
    config::StoreConfig,
    parquet_writer::{CellValue, ColumnType, TypedParquetWriter},
    store::Store,
};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const CSV_DELIMITER: u8 = b';';
const PARQUET_BATCH_SIZE: usize = 50_000;

const NO_SYMPTOMS: &str = "Assintomático/Não Informado";
const HEALTH_PROFESSIONAL: &str = "Profissional de Saúde";
const OTHER_OCCUPATION: &str = "Outros";
const NOT_VACCINATED: &str = "Não Vacinado";
const MAX_PLAUSIBLE_AGE: i64 = 120;

/// Upper bound (inclusive) and label of each age band; lower bounds are exclusive.
const AGE_BANDS: [(i64, &str); 6] = [
    (12, "Criança (0-12)"),
    (19, "Adolescente (13-19)"),
    (39, "Jovem Adulto (20-39)"),
    (59, "Adulto (40-59)"),
    (79, "Idoso (60-79)"),
    (120, "Super Idoso (80+)"),
];

pub const DATASET_COLUMNS: [(&str, ColumnType); 29] = [
    ("notificacao_id", ColumnType::Int64),
    ("data_notificacao", ColumnType::Date32),
    ("semana_epidemiologica", ColumnType::Int64),
    ("mes_notificacao", ColumnType::Int64),
    ("codigo_ibge", ColumnType::Int64),
    ("municipio_nome", ColumnType::Utf8),
    ("uf_sigla", ColumnType::Utf8),
    ("idade", ColumnType::Int64),
    ("sexo", ColumnType::Utf8),
    ("raca_cor", ColumnType::Utf8),
    ("ocupacao_cbo", ColumnType::Utf8),
    ("is_profissional_saude", ColumnType::Utf8),
    ("data_inicio_sintomas", ColumnType::Date32),
    ("classificacao_final", ColumnType::Utf8),
    ("evolucao_caso", ColumnType::Utf8),
    ("sintomas_texto", ColumnType::Utf8),
    ("flg_febre", ColumnType::Int64),
    ("flg_tosse", ColumnType::Int64),
    ("flg_dispneia", ColumnType::Int64),
    ("doses_vacina", ColumnType::Int64),
    ("fabricantes_vacina", ColumnType::Utf8),
    ("status_vacinal", ColumnType::Utf8),
    ("testes_realizados", ColumnType::Int64),
    ("tipos_testes_lista", ColumnType::Utf8),
    ("fabricantes_teste_lista", ColumnType::Utf8),
    ("resultado_teste_agregado", ColumnType::Utf8),
    ("faixa_etaria", ColumnType::Utf8),
    ("categoria_ocupacao", ColumnType::Utf8),
    ("target_confirmado", ColumnType::Int64),
];

const DATASET_QUERY: &str = "
    WITH agg_sintomas AS (
        SELECT
            ns.notificacao_id,
            group_concat(s.nome, ', ' ORDER BY s.nome) AS lista_sintomas,
            MAX(CASE WHEN s.nome LIKE '%Febre%' THEN 1 ELSE 0 END) AS tem_febre,
            MAX(CASE WHEN s.nome LIKE '%Tosse%' THEN 1 ELSE 0 END) AS tem_tosse,
            MAX(CASE WHEN s.nome LIKE '%Dispneia%' OR s.nome LIKE '%falta de ar%'
                THEN 1 ELSE 0 END) AS tem_dispneia
        FROM notificacao_sintoma ns
        JOIN sintoma s ON ns.sintoma_id = s.sintoma_id
        GROUP BY ns.notificacao_id
    ),
    agg_vacinas AS (
        SELECT notificacao_id, COUNT(*) AS total_doses
        FROM vacina_aplicada
        GROUP BY notificacao_id
    ),
    agg_fabricantes_vacina AS (
        SELECT notificacao_id, group_concat(laboratorio, ' / ') AS fabricantes_vacina
        FROM (
            SELECT DISTINCT notificacao_id, laboratorio
            FROM vacina_aplicada
            WHERE laboratorio IS NOT NULL
            ORDER BY notificacao_id, laboratorio
        )
        GROUP BY notificacao_id
    ),
    agg_testes AS (
        SELECT
            notificacao_id,
            COUNT(*) AS qtd_testes_realizados,
            MAX(CASE WHEN resultado_teste LIKE '%Positivo%' OR resultado_teste LIKE '%Detectável%'
                THEN 1 ELSE 0 END) AS houve_teste_positivo
        FROM teste_laboratorial
        GROUP BY notificacao_id
    ),
    agg_tipos_teste AS (
        SELECT notificacao_id, group_concat(tipo_teste, ', ') AS tipos_testes_lista
        FROM (
            SELECT DISTINCT notificacao_id, tipo_teste
            FROM teste_laboratorial
            ORDER BY notificacao_id, tipo_teste
        )
        GROUP BY notificacao_id
    ),
    agg_fabricantes_teste AS (
        SELECT notificacao_id, group_concat(fabricante_teste, ', ') AS fabricantes_teste_lista
        FROM (
            SELECT DISTINCT notificacao_id, fabricante_teste
            FROM teste_laboratorial
            WHERE fabricante_teste IS NOT NULL
            ORDER BY notificacao_id, fabricante_teste
        )
        GROUP BY notificacao_id
    )
    SELECT
        n.notificacao_id,
        n.data_notificacao,
        mun.municipio_ibge,
        mun.nome,
        est.sigla,
        d.idade,
        d.sexo,
        d.raca_cor,
        d.cbo,
        d.is_profissional_saude,
        c.data_inicio_sintomas,
        c.classificacao_final,
        c.evolucao_caso,
        s.lista_sintomas,
        COALESCE(s.tem_febre, 0),
        COALESCE(s.tem_tosse, 0),
        COALESCE(s.tem_dispneia, 0),
        COALESCE(v.total_doses, 0),
        fv.fabricantes_vacina,
        COALESCE(t.qtd_testes_realizados, 0),
        COALESCE(t.houve_teste_positivo, 0),
        tt.tipos_testes_lista,
        ft.fabricantes_teste_lista
    FROM notificacao n
    INNER JOIN municipio mun ON n.municipio_notificacao_ibge = mun.municipio_ibge
    INNER JOIN estado est ON n.estado_notificacao_ibge = est.estado_ibge
    INNER JOIN dados_demograficos d ON n.notificacao_id = d.notificacao_id
    INNER JOIN dados_clinicos c ON n.notificacao_id = c.notificacao_id
    LEFT JOIN agg_sintomas s ON n.notificacao_id = s.notificacao_id
    LEFT JOIN agg_vacinas v ON n.notificacao_id = v.notificacao_id
    LEFT JOIN agg_fabricantes_vacina fv ON n.notificacao_id = fv.notificacao_id
    LEFT JOIN agg_testes t ON n.notificacao_id = t.notificacao_id
    LEFT JOIN agg_tipos_teste tt ON n.notificacao_id = tt.notificacao_id
    LEFT JOIN agg_fabricantes_teste ft ON n.notificacao_id = ft.notificacao_id
    WHERE n.excluido = 0
    ORDER BY n.notificacao_id
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRow {
    pub notificacao_id: i64,
    pub data_notificacao: Option<NaiveDate>,
    pub semana_epidemiologica: Option<i64>,
    pub mes_notificacao: Option<i64>,
    pub codigo_ibge: i64,
    pub municipio_nome: Option<String>,
    pub uf_sigla: String,
    pub idade: Option<i64>,
    pub sexo: Option<String>,
    pub raca_cor: Option<String>,
    pub ocupacao_cbo: Option<String>,
    pub is_profissional_saude: Option<String>,
    pub data_inicio_sintomas: Option<NaiveDate>,
    pub classificacao_final: Option<String>,
    pub evolucao_caso: Option<String>,
    pub sintomas_texto: String,
    pub flg_febre: i64,
    pub flg_tosse: i64,
    pub flg_dispneia: i64,
    pub doses_vacina: i64,
    pub fabricantes_vacina: Option<String>,
    pub status_vacinal: String,
    pub testes_realizados: i64,
    pub tipos_testes_lista: Option<String>,
    pub fabricantes_teste_lista: Option<String>,
    pub resultado_teste_agregado: String,
    pub faixa_etaria: Option<String>,
    pub categoria_ocupacao: String,
    pub target_confirmado: Option<i64>,
}

impl DatasetRow {
    fn cells(&self) -> [CellValue<'_>; 29] {
        [
            CellValue::Int(Some(self.notificacao_id)),
            CellValue::Date(self.data_notificacao),
            CellValue::Int(self.semana_epidemiologica),
            CellValue::Int(self.mes_notificacao),
            CellValue::Int(Some(self.codigo_ibge)),
            CellValue::Text(self.municipio_nome.as_deref()),
            CellValue::Text(Some(&self.uf_sigla)),
            CellValue::Int(self.idade),
            CellValue::Text(self.sexo.as_deref()),
            CellValue::Text(self.raca_cor.as_deref()),
            CellValue::Text(self.ocupacao_cbo.as_deref()),
            CellValue::Text(self.is_profissional_saude.as_deref()),
            CellValue::Date(self.data_inicio_sintomas),
            CellValue::Text(self.classificacao_final.as_deref()),
            CellValue::Text(self.evolucao_caso.as_deref()),
            CellValue::Text(Some(&self.sintomas_texto)),
            CellValue::Int(Some(self.flg_febre)),
            CellValue::Int(Some(self.flg_tosse)),
            CellValue::Int(Some(self.flg_dispneia)),
            CellValue::Int(Some(self.doses_vacina)),
            CellValue::Text(self.fabricantes_vacina.as_deref()),
            CellValue::Text(Some(&self.status_vacinal)),
            CellValue::Int(Some(self.testes_realizados)),
            CellValue::Text(self.tipos_testes_lista.as_deref()),
            CellValue::Text(self.fabricantes_teste_lista.as_deref()),
            CellValue::Text(Some(&self.resultado_teste_agregado)),
            CellValue::Text(self.faixa_etaria.as_deref()),
            CellValue::Text(Some(&self.categoria_ocupacao)),
            CellValue::Int(self.target_confirmado),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetAudit {
    pub rows: usize,
    pub columns: usize,
    pub vaccinated_rows: usize,
    pub tested_rows: usize,
    pub distinct_municipalities: usize,
    /// Share of each target value among rows where the target is known.
    pub target_balance: BTreeMap<i64, f64>,
}

pub fn vaccination_status(doses: i64) -> &'static str {
    match doses {
        d if d >= 2 => "Esquema Completo",
        1 => "Parcial",
        _ => NOT_VACCINATED,
    }
}

pub fn test_outcome(tests: i64, any_positive: bool) -> &'static str {
    if any_positive {
        "Positivo"
    } else if tests > 0 {
        "Negativo/Inconclusivo"
    } else {
        "Não Testado"
    }
}

/// Ages outside 0..=120 are treated as entry errors.
pub fn plausible_age(age: Option<i64>) -> Option<i64> {
    age.filter(|a| (0..=MAX_PLAUSIBLE_AGE).contains(a))
}

/// Right-closed bands; an age of 0 falls below the first band.
pub fn age_band(age: Option<i64>) -> Option<&'static str> {
    let age = age?;
    if age <= 0 {
        return None;
    }
    AGE_BANDS
        .iter()
        .find(|(upper, _)| age <= *upper)
        .map(|(_, label)| *label)
}

pub fn occupation_category(is_profissional_saude: Option<&str>) -> &'static str {
    if is_profissional_saude == Some("Sim") {
        HEALTH_PROFESSIONAL
    } else {
        OTHER_OCCUPATION
    }
}

pub fn confirmed_target(classificacao_final: Option<&str>) -> Option<i64> {
    let status = classificacao_final?;
    if status.contains("Confirmado") || status.contains("Laboratorial") {
        Some(1)
    } else {
        Some(0)
    }
}

pub fn query_dataset(conn: &Connection) -> Result<Vec<DatasetRow>> {
    let mut stmt = conn
        .prepare(DATASET_QUERY)
        .context("Failed preparing dataset export query")?;
    let mut rows = stmt.query([]).context("Failed querying dataset rows")?;

    let mut dataset = Vec::new();
    while let Some(row) = rows.next().context("Failed iterating dataset rows")? {
        let data_notificacao: Option<NaiveDate> =
            row.get(1).context("Failed reading data_notificacao")?;
        let idade: Option<i64> = row.get(5).context("Failed reading idade")?;
        let is_profissional_saude: Option<String> =
            row.get(9).context("Failed reading is_profissional_saude")?;
        let classificacao_final: Option<String> =
            row.get(11).context("Failed reading classificacao_final")?;
        let lista_sintomas: Option<String> = row.get(13).context("Failed reading sintomas")?;
        let doses_vacina: i64 = row.get(17).context("Failed reading doses_vacina")?;
        let testes_realizados: i64 = row.get(19).context("Failed reading testes_realizados")?;
        let houve_teste_positivo: i64 =
            row.get(20).context("Failed reading houve_teste_positivo")?;

        let idade = plausible_age(idade);
        dataset.push(DatasetRow {
            notificacao_id: row.get(0).context("Failed reading notificacao_id")?,
            data_notificacao,
            semana_epidemiologica: data_notificacao.map(|d| i64::from(d.iso_week().week())),
            mes_notificacao: data_notificacao.map(|d| i64::from(d.month())),
            codigo_ibge: row.get(2).context("Failed reading municipio_ibge")?,
            municipio_nome: row.get(3).context("Failed reading municipio nome")?,
            uf_sigla: row.get(4).context("Failed reading uf sigla")?,
            idade,
            sexo: row.get(6).context("Failed reading sexo")?,
            raca_cor: row.get(7).context("Failed reading raca_cor")?,
            ocupacao_cbo: row.get(8).context("Failed reading cbo")?,
            data_inicio_sintomas: row.get(10).context("Failed reading data_inicio_sintomas")?,
            evolucao_caso: row.get(12).context("Failed reading evolucao_caso")?,
            sintomas_texto: lista_sintomas.unwrap_or_else(|| NO_SYMPTOMS.to_string()),
            flg_febre: row.get(14).context("Failed reading flg_febre")?,
            flg_tosse: row.get(15).context("Failed reading flg_tosse")?,
            flg_dispneia: row.get(16).context("Failed reading flg_dispneia")?,
            doses_vacina,
            fabricantes_vacina: row.get(18).context("Failed reading fabricantes_vacina")?,
            status_vacinal: vaccination_status(doses_vacina).to_string(),
            testes_realizados,
            tipos_testes_lista: row.get(21).context("Failed reading tipos_testes_lista")?,
            fabricantes_teste_lista: row
                .get(22)
                .context("Failed reading fabricantes_teste_lista")?,
            resultado_teste_agregado: test_outcome(testes_realizados, houve_teste_positivo == 1)
                .to_string(),
            faixa_etaria: age_band(idade).map(str::to_string),
            categoria_ocupacao: occupation_category(is_profissional_saude.as_deref()).to_string(),
            target_confirmado: confirmed_target(classificacao_final.as_deref()),
            is_profissional_saude,
            classificacao_final,
        });
    }
    Ok(dataset)
}

pub fn audit_dataset(rows: &[DatasetRow]) -> DatasetAudit {
    let municipalities: HashSet<&str> = rows
        .iter()
        .filter_map(|r| r.municipio_nome.as_deref())
        .collect();

    let mut target_counts: BTreeMap<i64, usize> = BTreeMap::new();
    for target in rows.iter().filter_map(|r| r.target_confirmado) {
        *target_counts.entry(target).or_default() += 1;
    }
    let known: usize = target_counts.values().sum();
    let target_balance = target_counts
        .into_iter()
        .map(|(target, count)| (target, count as f64 / known as f64))
        .collect();

    DatasetAudit {
        rows: rows.len(),
        columns: DATASET_COLUMNS.len(),
        vaccinated_rows: rows
            .iter()
            .filter(|r| r.status_vacinal != NOT_VACCINATED)
            .count(),
        tested_rows: rows.iter().filter(|r| r.testes_realizados > 0).count(),
        distinct_municipalities: municipalities.len(),
        target_balance,
    }
}

/// `;`-separated, UTF-8 with BOM so spreadsheet tools pick up the accents.
pub fn write_csv(output_path: &Path, rows: &[DatasetRow]) -> Result<()> {
    ensure_parent_dir(output_path)?;
    let tmp_path = tmp_path_for(output_path, "dataset.csv");

    let mut file = File::create(&tmp_path)
        .with_context(|| format!("Failed creating temp dataset CSV {}", tmp_path.display()))?;
    file.write_all(UTF8_BOM)
        .context("Failed writing dataset CSV byte order mark")?;

    let mut writer = WriterBuilder::new()
        .delimiter(CSV_DELIMITER)
        .from_writer(file);
    writer
        .write_record(DATASET_COLUMNS.iter().map(|(name, _)| *name))
        .context("Failed writing dataset CSV header")?;
    for row in rows {
        writer
            .write_record(row.cells().iter().map(CellValue::render))
            .with_context(|| format!("Failed writing dataset row {}", row.notificacao_id))?;
    }
    writer
        .flush()
        .context("Failed flushing dataset CSV writer")?;
    drop(writer);

    move_into_place(&tmp_path, output_path)
}

pub fn write_parquet(output_path: &Path, rows: &[DatasetRow]) -> Result<()> {
    let mut writer =
        TypedParquetWriter::try_new(output_path, &DATASET_COLUMNS, PARQUET_BATCH_SIZE)?;
    for row in rows {
        if let Err(err) = writer.push_row(&row.cells()) {
            writer.abort();
            return Err(err);
        }
    }
    writer.finish()
}

pub fn run_export(args: ExportArgs) -> Result<DatasetAudit> {
    let config = StoreConfig::from_env()?.with_override(args.db_path.clone());
    tracing::info!("esus-pipeline export");
    tracing::info!("db_path={}", config.db_path.display());
    tracing::info!("output_path={}", args.output_path.display());

    let store = Store::open_read_only(&config.db_path)?;

    tracing::info!("Step 1/3: query flattened dataset");
    let rows = query_dataset(store.conn())?;
    if rows.is_empty() && !args.allow_empty {
        anyhow::bail!(
            "Dataset query returned 0 rows from {} (pass --allow-empty to write an empty file)",
            config.db_path.display()
        );
    }
    tracing::info!("Extracted {} rows", rows.len());

    tracing::info!("Step 2/3: write {}", args.output_path.display());
    if lowercase_extension(&args.output_path) == "parquet" {
        write_parquet(&args.output_path, &rows)?;
    } else {
        write_csv(&args.output_path, &rows)?;
    }

    tracing::info!("Step 3/3: audit");
    let audit = audit_dataset(&rows);
    log_audit(&audit);
    Ok(audit)
}

fn log_audit(audit: &DatasetAudit) {
    tracing::info!("Audit rows={} columns={}", audit.rows, audit.columns);
    tracing::info!("Audit vaccinated_rows={}", audit.vaccinated_rows);
    tracing::info!("Audit tested_rows={}", audit.tested_rows);
    tracing::info!("Audit distinct_municipalities={}", audit.distinct_municipalities);
    if audit.target_balance.is_empty() {
        tracing::info!("Audit target_balance: no rows with a final classification");
    } else {
        for (target, share) in &audit.target_balance {
            tracing::info!("Audit target_confirmado={} share={:.4}", target, share);
        }
    }
}
