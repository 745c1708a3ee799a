use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;

use super::{CommitReport, GraphStore, MatchField};
use crate::db::Db;
use crate::error::Result;
use crate::graph::{
    bounded_traverse, split_source_refs, EdgeFields, Entity, EntityType, NodeFields, Relation, RelationType,
    Subgraph,
};

const NODE_COLUMNS: &str = "id, node_type, name, definition, module, difficulty, source_ref";
const EDGE_COLUMNS: &str = "head, relation, tail, confidence, justification, source_ref";

/// Graph store backed by the `nodes` / `edges` tables.
#[derive(Debug, Clone)]
pub struct SqliteGraphStore {
    db: Db,
}

/// Row as stored; enum columns are parsed after the row is read.
struct NodeRow {
    id: String,
    node_type: String,
    name: String,
    definition: String,
    module: String,
    difficulty: String,
    source_ref: String,
}

impl NodeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            node_type: row.get(1)?,
            name: row.get(2)?,
            definition: row.get(3)?,
            module: row.get(4)?,
            difficulty: row.get(5)?,
            source_ref: row.get(6)?,
        })
    }

    fn into_entity(self) -> Result<Entity> {
        Ok(Entity::from_fields(
            self.node_type.parse()?,
            self.id,
            NodeFields {
                name: self.name,
                definition: self.definition,
                module: self.module,
                difficulty: self.difficulty.parse()?,
                source_refs: split_source_refs(&self.source_ref),
            },
        ))
    }
}

struct EdgeRow {
    head: String,
    relation: String,
    tail: String,
    fields: EdgeFields,
}

impl EdgeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            head: row.get(0)?,
            relation: row.get(1)?,
            tail: row.get(2)?,
            fields: EdgeFields {
                confidence: row.get(3)?,
                justification: row.get(4)?,
                source_ref: row.get(5)?,
            },
        })
    }

    fn into_relation(self) -> Result<Relation> {
        let rel: RelationType = self.relation.parse()?;
        Ok(Relation::from_fields(self.head, rel, self.tail, self.fields))
    }
}

fn query_nodes(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Entity>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), NodeRow::from_row)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    rows.into_iter().map(NodeRow::into_entity).collect()
}

fn write_node(conn: &Connection, node_type: EntityType, id: &str, fields: &NodeFields) -> Result<()> {
    let source_ref = fields.source_refs.iter().cloned().collect::<Vec<_>>().join(";");
    conn.execute(
        "INSERT INTO nodes (id, node_type, name, definition, module, difficulty, source_ref)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            node_type = excluded.node_type,
            name = excluded.name,
            definition = excluded.definition,
            module = excluded.module,
            difficulty = excluded.difficulty,
            source_ref = excluded.source_ref,
            updated_at = CURRENT_TIMESTAMP",
        params![
            id,
            node_type.as_str(),
            fields.name,
            fields.definition,
            fields.module,
            fields.difficulty.as_str(),
            source_ref
        ],
    )?;
    Ok(())
}

fn write_edge(conn: &Connection, head: &str, rel: RelationType, tail: &str, fields: &EdgeFields) -> Result<bool> {
    let endpoints_exist: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM nodes WHERE name = ?1) AND EXISTS(SELECT 1 FROM nodes WHERE name = ?2)",
        params![head, tail],
        |row| row.get(0),
    )?;
    if !endpoints_exist {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO edges (head, relation, tail, confidence, justification, source_ref)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(head, relation, tail) DO UPDATE SET
            confidence = excluded.confidence,
            justification = excluded.justification,
            source_ref = excluded.source_ref",
        params![head, rel.as_str(), tail, fields.confidence, fields.justification, fields.source_ref],
    )?;
    Ok(true)
}

fn incident_edges(conn: &Connection, node: &str) -> Result<Vec<Relation>> {
    let sql = format!("SELECT {} FROM edges WHERE head = ?1 OR tail = ?1", EDGE_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map([node], EdgeRow::from_row)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    rows.into_iter().map(EdgeRow::into_relation).collect()
}

impl SqliteGraphStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Open the database at `db_path` and bring its schema up to date.
    pub async fn open<P: AsRef<Path>>(db_path: P, migrations_dir: &Path) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let db = Db::new(db_path);
        db.migrate(migrations_dir).await?;
        Ok(Self::new(db))
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_node(&self, node_type: EntityType, id: &str, fields: &NodeFields) -> Result<()> {
        let id = id.to_string();
        let fields = fields.clone();
        self.db
            .with_connection(move |conn| write_node(conn, node_type, &id, &fields))
            .await
    }

    async fn upsert_edge(&self, head: &str, rel: RelationType, tail: &str, fields: &EdgeFields) -> Result<bool> {
        let head = head.to_string();
        let tail = tail.to_string();
        let fields = fields.clone();
        self.db
            .with_connection(move |conn| write_edge(conn, &head, rel, &tail, &fields))
            .await
    }

    async fn match_by_substring(
        &self,
        field: MatchField,
        keyword: &str,
        types: &[EntityType],
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let column = field.column();
        let mut params = vec![Value::Text(keyword.to_string())];
        let type_filter = if types.is_empty() {
            String::new()
        } else {
            let placeholders = (0..types.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            for t in types {
                params.push(Value::Text(t.as_str().to_string()));
            }
            format!(" AND node_type IN ({})", placeholders)
        };
        params.push(Value::Integer(limit as i64));
        let sql = format!(
            "SELECT {} FROM nodes WHERE (?1 = '' OR instr({}, ?1) > 0){} ORDER BY name, id LIMIT ?{}",
            NODE_COLUMNS,
            column,
            type_filter,
            params.len()
        );

        self.db
            .with_connection(move |conn| query_nodes(conn, &sql, &params))
            .await
    }

    async fn match_by_module(&self, keyword: &str, limit: usize) -> Result<Vec<Entity>> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE (?1 = '' OR instr(module, ?1) > 0) ORDER BY name, id LIMIT ?2",
            NODE_COLUMNS
        );
        let params = vec![Value::Text(keyword.to_string()), Value::Integer(limit as i64)];
        self.db
            .with_connection(move |conn| query_nodes(conn, &sql, &params))
            .await
    }

    async fn traverse(&self, anchor: &str, max_hops: usize) -> Result<Subgraph> {
        let anchor = anchor.to_string();
        self.db
            .with_connection(move |conn| bounded_traverse(&anchor, max_hops, |node| incident_edges(conn, node)))
            .await
    }

    async fn get_node(&self, name: &str) -> Result<Option<Entity>> {
        let name = name.to_string();
        self.db
            .with_connection(move |conn| {
                let sql = format!("SELECT {} FROM nodes WHERE name = ?1 ORDER BY id LIMIT 1", NODE_COLUMNS);
                let row = conn
                    .query_row(&sql, [&name], NodeRow::from_row)
                    .optional()?;
                row.map(NodeRow::into_entity).transpose()
            })
            .await
    }

    async fn node_count(&self) -> Result<usize> {
        self.db
            .with_connection(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
    }

    /// Whole graph in one transaction; nothing is kept if any write fails.
    async fn commit_graph(&self, entities: &[Entity], relations: &[Relation]) -> Result<CommitReport> {
        let entities = entities.to_vec();
        let relations = relations.to_vec();
        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                let mut report = CommitReport::default();

                for entity in &entities {
                    write_node(&tx, entity.entity_type, &entity.id, &entity.fields())?;
                    report.nodes += 1;
                }
                for relation in &relations {
                    if write_edge(&tx, &relation.head, relation.rel, &relation.tail, &relation.fields())? {
                        report.edges += 1;
                    } else {
                        log::debug!(
                            "Skipping edge {} -[{}]-> {}: endpoint missing",
                            relation.head,
                            relation.rel,
                            relation.tail
                        );
                        report.skipped_edges += 1;
                    }
                }

                tx.commit()?;
                Ok(report)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CurriculumError;
    use crate::store::testing::{entity, exercise_store};
    use tempfile::TempDir;

    async fn setup_store() -> (SqliteGraphStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        let store = SqliteGraphStore::open(temp_dir.path().join("kg").join("graph.db"), &migrations_dir)
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_store_contract() {
        let (store, _temp_dir) = setup_store().await;
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_edge_upsert_is_idempotent() {
        let (store, _temp_dir) = setup_store().await;
        let a = entity("A", EntityType::TeachingTask);
        let b = entity("B", EntityType::TeachingTask);
        let mut rel = Relation::new("A", RelationType::PredecessorTask, "B");
        store.commit_graph(&[a, b], &[rel.clone()]).await.unwrap();

        rel.confidence = 0.4;
        assert!(store.upsert_edge("A", rel.rel, "B", &rel.fields()).await.unwrap());

        let subgraph = store.traverse("A", 1).await.unwrap();
        assert_eq!(subgraph.edges, vec![rel]);
    }

    #[tokio::test]
    async fn test_source_refs_survive_storage() {
        let (store, _temp_dir) = setup_store().await;
        let mut node = entity("Lactate Threshold", EntityType::KnowledgePoint);
        node.source_refs = ["chunk_2".to_string(), "chunk_1".to_string()].into_iter().collect();
        store.upsert_node(node.entity_type, &node.id, &node.fields()).await.unwrap();

        let fetched = store.get_node("Lactate Threshold").await.unwrap().unwrap();
        assert_eq!(fetched.source_refs, node.source_refs);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_reported() {
        let (store, _temp_dir) = setup_store().await;
        store
            .db
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO nodes (id, node_type, name) VALUES ('x', 'Lesson', 'Broken')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let result = store.get_node("Broken").await;
        assert!(matches!(result, Err(CurriculumError::InvalidRecord(_))));
    }
}
