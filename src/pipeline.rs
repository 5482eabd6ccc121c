use anyhow::{Context, Result};
use serde::Serialize;
use std::{fs, path::Path, time::Instant};

use crate::{
    args::LoadArgs,
    common::{delete_if_exists, ensure_parent_dir},
    config::StoreConfig,
    expand::{expand_doses, expand_symptoms, expand_tests, symptom_links},
    geo::{ReconciliationTable, STATES, build_municipalities},
    notification::{MunicipalitySet, select_notifications},
    record::{RawRecord, load_records},
    satellites,
    store::Store,
};

const TOTAL_STEPS: usize = 7;

/// Row counts per stage, written as the load report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub db_path: String,
    pub records_read: usize,
    pub lookup_entries: usize,
    pub residence_codes_recovered: usize,
    pub notification_codes_recovered: usize,
    pub states: usize,
    pub municipalities: usize,
    pub notifications: usize,
    pub notifications_dropped: usize,
    pub demographics: usize,
    pub clinical: usize,
    pub strategy: usize,
    pub epidemiological: usize,
    pub symptoms: usize,
    pub symptom_links: usize,
    pub lab_tests: usize,
    pub vaccine_doses: usize,
}

pub fn run_load(args: LoadArgs) -> Result<LoadSummary> {
    let config = StoreConfig::from_env()?.with_override(args.db_path.clone());
    tracing::info!("esus-pipeline load");
    tracing::info!("input_path={}", args.input_path.display());
    tracing::info!("db_path={}", config.db_path.display());
    if args.reset_db {
        tracing::info!("reset_db=true (existing store file will be deleted)");
        delete_if_exists(&config.db_path)?;
    }

    // Connectivity is checked before any input is read.
    let mut store = Store::open(&config.db_path)?;
    if !args.no_init_schema {
        store.init_schema()?;
    }

    tracing::info!("Step 1/{TOTAL_STEPS}: read line-list");
    let t0 = Instant::now();
    let mut records = load_records(&args.input_path, args.delimiter)?;
    tracing::info!(
        "Read {} records in {:.1}s",
        records.len(),
        t0.elapsed().as_secs_f64()
    );

    let mut summary = load_records_into(&mut store, &mut records)?;
    summary.db_path = config.db_path.display().to_string();

    if let Some(report_path) = &args.report_json {
        write_report(report_path, &summary)?;
        tracing::info!("Wrote load report {}", report_path.display());
    }

    Ok(summary)
}

/// Runs every stage after reading against an already opened store.
pub fn load_records_into(store: &mut Store, records: &mut [RawRecord]) -> Result<LoadSummary> {
    let mut summary = LoadSummary {
        records_read: records.len(),
        ..LoadSummary::default()
    };

    tracing::info!("Step 2/{TOTAL_STEPS}: reconcile geographic codes");
    let lookup = ReconciliationTable::build(records);
    let stats = lookup.reconcile(records);
    summary.lookup_entries = lookup.len();
    if lookup.is_empty() {
        tracing::warn!("No place name is paired with a numeric code; nothing can be recovered");
    }
    summary.residence_codes_recovered = stats.residence_codes_recovered;
    summary.notification_codes_recovered = stats.notification_codes_recovered;
    tracing::info!(
        "Lookup has {} names; recovered {} residence and {} notification codes",
        summary.lookup_entries,
        summary.residence_codes_recovered,
        summary.notification_codes_recovered
    );

    tracing::info!("Step 3/{TOTAL_STEPS}: reference tables (estado + municipio)");
    summary.states = store
        .insert_states(&STATES)
        .context("Failed writing estado table")?;
    let municipalities = build_municipalities(records);
    summary.municipalities = store
        .insert_municipalities(&municipalities)
        .context("Failed writing municipio table")?;
    let municipality_set = MunicipalitySet::from_dimension(&municipalities);
    tracing::info!(
        "Inserted {} states and {} municipalities",
        summary.states,
        summary.municipalities
    );

    tracing::info!("Step 4/{TOTAL_STEPS}: notifications");
    let (notifications, working) = select_notifications(records, &municipality_set);
    summary.notifications = store
        .insert_notifications(&notifications)
        .context("Failed writing notificacao table")?;
    summary.notifications_dropped = records.len() - working.len();
    if summary.notifications_dropped > 0 {
        tracing::warn!(
            "Dropped {} records whose notification municipality is not in the dimension",
            summary.notifications_dropped
        );
    }
    if working.is_empty() {
        tracing::warn!("No notification passed the municipality check; child tables stay empty");
    }
    tracing::info!("Inserted {} notifications", summary.notifications);

    tracing::info!("Step 5/{TOTAL_STEPS}: satellite tables");
    summary.demographics = store
        .insert_demographics(&satellites::demographics(&working))
        .context("Failed writing dados_demograficos table")?;
    summary.clinical = store
        .insert_clinical(&satellites::clinical(&working))
        .context("Failed writing dados_clinicos table")?;
    summary.strategy = store
        .insert_strategy(&satellites::strategy(&working))
        .context("Failed writing dados_gestao_estrategia table")?;
    summary.epidemiological = store
        .insert_epidemiological(&satellites::epidemiological(&working, &municipality_set))
        .context("Failed writing dados_epidemiologicos table")?;
    tracing::info!(
        "Inserted satellites: demographics={} clinical={} strategy={} epidemiological={}",
        summary.demographics,
        summary.clinical,
        summary.strategy,
        summary.epidemiological
    );

    tracing::info!("Step 6/{TOTAL_STEPS}: symptoms");
    let expansion = expand_symptoms(&working);
    summary.symptoms = store
        .insert_symptoms(&expansion.dictionary)
        .context("Failed writing sintoma table")?;
    let symptom_ids = store.symptom_ids()?;
    let links = symptom_links(&expansion.mentions, &symptom_ids);
    summary.symptom_links = store
        .insert_symptom_links(&links)
        .context("Failed writing notificacao_sintoma table")?;
    tracing::info!(
        "Inserted {} symptoms and {} notification links",
        summary.symptoms,
        summary.symptom_links
    );

    tracing::info!("Step 7/{TOTAL_STEPS}: lab tests + vaccine doses");
    summary.lab_tests = store
        .insert_lab_tests(&expand_tests(&working))
        .context("Failed writing teste_laboratorial table")?;
    summary.vaccine_doses = store
        .insert_vaccine_doses(&expand_doses(&working))
        .context("Failed writing vacina_aplicada table")?;
    tracing::info!(
        "Inserted {} lab tests and {} vaccine doses",
        summary.lab_tests,
        summary.vaccine_doses
    );

    Ok(summary)
}

fn write_report(path: &Path, summary: &LoadSummary) -> Result<()> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(summary).context("Failed serializing load report")?;
    fs::write(path, json).with_context(|| format!("Failed writing {}", path.display()))
}
