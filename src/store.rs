use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, Statement, params};
use std::{collections::HashMap, path::Path};

use crate::{
    common::{ensure_parent_dir, stage_progress},
    expand::{LabTestRow, VaccineDoseRow},
    geo::{Municipality, StateInfo},
    notification::NotificationRow,
    satellites::{ClinicalRow, DemographicsRow, EpidemiologicalRow, StrategyRow},
};

pub const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS estado (
        estado_ibge INTEGER PRIMARY KEY,
        nome TEXT NOT NULL,
        sigla TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS municipio (
        municipio_ibge INTEGER PRIMARY KEY,
        nome TEXT,
        estado_ibge INTEGER NOT NULL REFERENCES estado(estado_ibge)
    );
    CREATE TABLE IF NOT EXISTS notificacao (
        notificacao_id INTEGER PRIMARY KEY,
        source_id TEXT,
        data_notificacao TEXT,
        municipio_notificacao_ibge INTEGER NOT NULL REFERENCES municipio(municipio_ibge),
        estado_notificacao_ibge INTEGER REFERENCES estado(estado_ibge),
        excluido INTEGER,
        validado INTEGER
    );
    CREATE TABLE IF NOT EXISTS dados_demograficos (
        notificacao_id INTEGER PRIMARY KEY REFERENCES notificacao(notificacao_id),
        idade INTEGER,
        sexo TEXT,
        raca_cor TEXT,
        is_profissional_saude TEXT,
        is_profissional_seguranca TEXT,
        cbo TEXT,
        pertence_comunidade_tradicional INTEGER
    );
    CREATE TABLE IF NOT EXISTS dados_clinicos (
        notificacao_id INTEGER PRIMARY KEY REFERENCES notificacao(notificacao_id),
        data_inicio_sintomas TEXT,
        data_encerramento TEXT,
        classificacao_final TEXT,
        evolucao_caso TEXT,
        total_testes_realizados INTEGER,
        outros_sintomas TEXT,
        outras_condicoes TEXT
    );
    CREATE TABLE IF NOT EXISTS dados_gestao_estrategia (
        notificacao_id INTEGER PRIMARY KEY REFERENCES notificacao(notificacao_id),
        codigo_estrategia_covid TEXT,
        codigo_busca_ativa_assintomatico TEXT,
        outro_busca_ativa_assintomatico TEXT,
        codigo_triagem_populacao_especifica TEXT,
        outro_triagem_populacao_especifica TEXT,
        codigo_local_realizacao_testagem TEXT,
        outro_local_realizacao_testagem TEXT
    );
    CREATE TABLE IF NOT EXISTS dados_epidemiologicos (
        notificacao_id INTEGER PRIMARY KEY REFERENCES notificacao(notificacao_id),
        origem_dados TEXT,
        municipio_residencia_ibge INTEGER REFERENCES municipio(municipio_ibge),
        estado_residencia_ibge INTEGER REFERENCES estado(estado_ibge)
    );
    CREATE TABLE IF NOT EXISTS sintoma (
        sintoma_id INTEGER PRIMARY KEY AUTOINCREMENT,
        nome TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS notificacao_sintoma (
        notificacao_id INTEGER NOT NULL REFERENCES notificacao(notificacao_id),
        sintoma_id INTEGER NOT NULL REFERENCES sintoma(sintoma_id),
        PRIMARY KEY (notificacao_id, sintoma_id)
    );
    CREATE TABLE IF NOT EXISTS teste_laboratorial (
        teste_id INTEGER PRIMARY KEY AUTOINCREMENT,
        notificacao_id INTEGER NOT NULL REFERENCES notificacao(notificacao_id),
        numero_sequencial INTEGER NOT NULL CHECK (numero_sequencial BETWEEN 1 AND 4),
        tipo_teste TEXT NOT NULL,
        fabricante_teste TEXT,
        resultado_teste TEXT,
        estado_teste TEXT,
        data_coleta TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_teste_laboratorial_notificacao
        ON teste_laboratorial(notificacao_id);
    CREATE TABLE IF NOT EXISTS vacina_aplicada (
        vacina_id INTEGER PRIMARY KEY AUTOINCREMENT,
        notificacao_id INTEGER NOT NULL REFERENCES notificacao(notificacao_id),
        dose_numero INTEGER NOT NULL CHECK (dose_numero BETWEEN 1 AND 2),
        data_aplicacao TEXT NOT NULL,
        laboratorio TEXT,
        lote TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_vacina_aplicada_notificacao
        ON vacina_aplicada(notificacao_id);
";

/// The relational target. One connection for the whole run; every bulk write is a
/// single transaction, so a stage lands completely or not at all.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_parent_dir(path)?;
        let conn = Connection::open(path)
            .with_context(|| format!("Failed opening store {}", path.display()))?;
        Self::from_connection(conn)
            .with_context(|| format!("Store {} is not usable", path.display()))
    }

    /// Opens a store that must already exist, without write access. Nothing is created
    /// when the path is wrong.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        anyhow::ensure!(path.is_file(), "Store {} does not exist", path.display());
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("Failed opening store {} read-only", path.display()))?;
        Self::from_connection(conn)
            .with_context(|| format!("Store {} is not usable", path.display()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed opening in-memory store")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed enabling foreign key enforcement")?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .context("Store connectivity check failed")?;
        Ok(Self { conn })
    }

    pub fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA_SQL)
            .context("Failed initializing store schema")
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .with_context(|| format!("Failed counting rows in {table}"))
    }

    fn bulk_insert<T>(
        &mut self,
        table: &str,
        sql: &str,
        rows: &[T],
        mut bind: impl FnMut(&mut Statement<'_>, &T) -> rusqlite::Result<usize>,
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let progress = stage_progress(table, rows.len());
        let tx = self
            .conn
            .transaction()
            .with_context(|| format!("Failed starting {table} transaction"))?;
        let mut stmt = tx
            .prepare(sql)
            .with_context(|| format!("Failed preparing {table} insert statement"))?;
        for (position, row) in rows.iter().enumerate() {
            bind(&mut stmt, row)
                .with_context(|| format!("Failed inserting row {} into {table}", position + 1))?;
            progress.inc(1);
        }
        drop(stmt);
        tx.commit()
            .with_context(|| format!("Failed committing {table} transaction"))?;
        progress.finish_and_clear();
        Ok(rows.len())
    }

    pub fn insert_states(&mut self, states: &[StateInfo]) -> Result<usize> {
        self.bulk_insert(
            "estado",
            "INSERT INTO estado (estado_ibge, nome, sigla) VALUES (?1, ?2, ?3)",
            states,
            |stmt, s| stmt.execute(params![s.code, s.name, s.uf]),
        )
    }

    pub fn insert_municipalities(&mut self, municipalities: &[Municipality]) -> Result<usize> {
        self.bulk_insert(
            "municipio",
            "INSERT INTO municipio (municipio_ibge, nome, estado_ibge) VALUES (?1, ?2, ?3)",
            municipalities,
            |stmt, m| stmt.execute(params![m.code, m.name, m.state_code]),
        )
    }

    pub fn insert_notifications(&mut self, rows: &[NotificationRow]) -> Result<usize> {
        self.bulk_insert(
            "notificacao",
            "
            INSERT INTO notificacao (
                notificacao_id,
                source_id,
                data_notificacao,
                municipio_notificacao_ibge,
                estado_notificacao_ibge,
                excluido,
                validado
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            rows,
            |stmt, n| {
                stmt.execute(params![
                    n.notificacao_id,
                    n.source_id,
                    n.data_notificacao,
                    n.municipio_notificacao_ibge,
                    n.estado_notificacao_ibge,
                    n.excluido,
                    n.validado,
                ])
            },
        )
    }

    pub fn insert_demographics(&mut self, rows: &[DemographicsRow]) -> Result<usize> {
        self.bulk_insert(
            "dados_demograficos",
            "
            INSERT INTO dados_demograficos (
                notificacao_id,
                idade,
                sexo,
                raca_cor,
                is_profissional_saude,
                is_profissional_seguranca,
                cbo,
                pertence_comunidade_tradicional
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            rows,
            |stmt, d| {
                stmt.execute(params![
                    d.notificacao_id,
                    d.idade,
                    d.sexo,
                    d.raca_cor,
                    d.is_profissional_saude,
                    d.is_profissional_seguranca,
                    d.cbo,
                    d.pertence_comunidade_tradicional,
                ])
            },
        )
    }

    pub fn insert_clinical(&mut self, rows: &[ClinicalRow]) -> Result<usize> {
        self.bulk_insert(
            "dados_clinicos",
            "
            INSERT INTO dados_clinicos (
                notificacao_id,
                data_inicio_sintomas,
                data_encerramento,
                classificacao_final,
                evolucao_caso,
                total_testes_realizados,
                outros_sintomas,
                outras_condicoes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            rows,
            |stmt, c| {
                stmt.execute(params![
                    c.notificacao_id,
                    c.data_inicio_sintomas,
                    c.data_encerramento,
                    c.classificacao_final,
                    c.evolucao_caso,
                    c.total_testes_realizados,
                    c.outros_sintomas,
                    c.outras_condicoes,
                ])
            },
        )
    }

    pub fn insert_strategy(&mut self, rows: &[StrategyRow]) -> Result<usize> {
        self.bulk_insert(
            "dados_gestao_estrategia",
            "
            INSERT INTO dados_gestao_estrategia (
                notificacao_id,
                codigo_estrategia_covid,
                codigo_busca_ativa_assintomatico,
                outro_busca_ativa_assintomatico,
                codigo_triagem_populacao_especifica,
                outro_triagem_populacao_especifica,
                codigo_local_realizacao_testagem,
                outro_local_realizacao_testagem
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            rows,
            |stmt, s| {
                stmt.execute(params![
                    s.notificacao_id,
                    s.codigo_estrategia_covid,
                    s.codigo_busca_ativa_assintomatico,
                    s.outro_busca_ativa_assintomatico,
                    s.codigo_triagem_populacao_especifica,
                    s.outro_triagem_populacao_especifica,
                    s.codigo_local_realizacao_testagem,
                    s.outro_local_realizacao_testagem,
                ])
            },
        )
    }

    pub fn insert_epidemiological(&mut self, rows: &[EpidemiologicalRow]) -> Result<usize> {
        self.bulk_insert(
            "dados_epidemiologicos",
            "
            INSERT INTO dados_epidemiologicos (
                notificacao_id,
                origem_dados,
                municipio_residencia_ibge,
                estado_residencia_ibge
            ) VALUES (?1, ?2, ?3, ?4)
            ",
            rows,
            |stmt, e| {
                stmt.execute(params![
                    e.notificacao_id,
                    e.origem_dados,
                    e.municipio_residencia_ibge,
                    e.estado_residencia_ibge,
                ])
            },
        )
    }

    pub fn insert_symptoms(&mut self, names: &[String]) -> Result<usize> {
        self.bulk_insert(
            "sintoma",
            "INSERT INTO sintoma (nome) VALUES (?1)",
            names,
            |stmt, name| stmt.execute([name]),
        )
    }

    /// Ids the store assigned to the symptom dictionary.
    pub fn symptom_ids(&self) -> Result<HashMap<String, i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT sintoma_id, nome FROM sintoma")
            .context("Failed preparing symptom id lookup")?;
        let mut rows = stmt.query([]).context("Failed querying symptom ids")?;
        let mut ids = HashMap::new();
        while let Some(row) = rows.next().context("Failed iterating symptom ids")? {
            let id: i64 = row.get(0).context("Failed reading sintoma_id")?;
            let name: String = row.get(1).context("Failed reading symptom name")?;
            ids.insert(name, id);
        }
        Ok(ids)
    }

    pub fn insert_symptom_links(&mut self, links: &[(i64, i64)]) -> Result<usize> {
        self.bulk_insert(
            "notificacao_sintoma",
            "INSERT INTO notificacao_sintoma (notificacao_id, sintoma_id) VALUES (?1, ?2)",
            links,
            |stmt, (notificacao_id, sintoma_id)| stmt.execute(params![notificacao_id, sintoma_id]),
        )
    }

    pub fn insert_lab_tests(&mut self, rows: &[LabTestRow]) -> Result<usize> {
        self.bulk_insert(
            "teste_laboratorial",
            "
            INSERT INTO teste_laboratorial (
                notificacao_id,
                numero_sequencial,
                tipo_teste,
                fabricante_teste,
                resultado_teste,
                estado_teste,
                data_coleta
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            rows,
            |stmt, t| {
                stmt.execute(params![
                    t.notificacao_id,
                    t.numero_sequencial,
                    t.tipo_teste,
                    t.fabricante_teste,
                    t.resultado_teste,
                    t.estado_teste,
                    t.data_coleta,
                ])
            },
        )
    }

    pub fn insert_vaccine_doses(&mut self, rows: &[VaccineDoseRow]) -> Result<usize> {
        self.bulk_insert(
            "vacina_aplicada",
            "
            INSERT INTO vacina_aplicada (
                notificacao_id,
                dose_numero,
                data_aplicacao,
                laboratorio,
                lote
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            rows,
            |stmt, v| {
                stmt.execute(params![
                    v.notificacao_id,
                    v.dose_numero,
                    v.data_aplicacao,
                    v.laboratorio,
                    v.lote,
                ])
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::STATES;

    fn store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.init_schema().unwrap();
        store
    }

    #[test]
    fn schema_is_reapplicable() {
        let store = store();
        store.init_schema().unwrap();
        assert_eq!(store.count_rows("estado").unwrap(), 0);
    }

    #[test]
    fn dangling_municipality_reference_fails_the_whole_batch() {
        let mut store = store();
        store.insert_states(&STATES).unwrap();
        let municipalities = vec![
            Municipality {
                code: 1_501_402,
                name: Some("Belém".to_string()),
                state_code: 15,
            },
            Municipality {
                code: 9_912_345,
                name: None,
                state_code: 99,
            },
        ];
        assert!(store.insert_municipalities(&municipalities).is_err());
        assert_eq!(store.count_rows("municipio").unwrap(), 0);
    }

    #[test]
    fn symptom_ids_are_read_back_after_insert() {
        let mut store = store();
        let names = vec!["Febre".to_string(), "Tosse".to_string()];
        assert_eq!(store.insert_symptoms(&names).unwrap(), 2);
        let ids = store.symptom_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids["Febre"], ids["Tosse"]);
    }

    #[test]
    fn read_only_open_refuses_a_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("typo/sus.sqlite");
        assert!(Store::open_read_only(&missing).is_err());
        assert!(!missing.exists());
        assert!(!dir.path().join("typo").exists());
    }

    #[test]
    fn read_only_store_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sus.sqlite");
        Store::open(&path).unwrap().init_schema().unwrap();

        let mut store = Store::open_read_only(&path).unwrap();
        assert_eq!(store.count_rows("estado").unwrap(), 0);
        assert!(store.insert_states(&STATES).is_err());
    }

    #[test]
    fn empty_batches_are_a_no_op() {
        let mut store = store();
        assert_eq!(store.insert_lab_tests(&[]).unwrap(), 0);
        assert_eq!(store.count_rows("teste_laboratorial").unwrap(), 0);
    }
}
