//! Tabular exports of the normalized graph for auditing and interop.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::graph::{Entity, Relation};

pub const NODES_FILE: &str = "nodes.csv";
pub const EDGES_FILE: &str = "edges.csv";

const NODE_HEADER: [&str; 7] = ["id", "name", "type", "definition", "module", "difficulty", "source_ref"];
const EDGE_HEADER: [&str; 6] = ["head", "relation", "tail", "confidence", "justification", "source_chunk"];

/// Quote a field when it contains a delimiter, quote or line break.
fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn push_row<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    let row: Vec<Cow<'_, str>> = fields.into_iter().map(escape_field).collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

pub fn nodes_csv(entities: &[Entity]) -> String {
    let mut out = String::new();
    push_row(&mut out, NODE_HEADER);
    for entity in entities {
        let source_ref = entity.source_ref();
        push_row(
            &mut out,
            [
                entity.id.as_str(),
                entity.canonical_name.as_str(),
                entity.entity_type.as_str(),
                entity.definition.as_str(),
                entity.module.as_str(),
                entity.difficulty.as_str(),
                source_ref.as_str(),
            ],
        );
    }
    out
}

pub fn edges_csv(relations: &[Relation]) -> String {
    let mut out = String::new();
    push_row(&mut out, EDGE_HEADER);
    for relation in relations {
        let confidence = relation.confidence.to_string();
        push_row(
            &mut out,
            [
                relation.head.as_str(),
                relation.rel.as_str(),
                relation.tail.as_str(),
                confidence.as_str(),
                relation.justification.as_str(),
                relation.source_ref.as_str(),
            ],
        );
    }
    out
}

/// Paths of one export pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPaths {
    pub nodes: PathBuf,
    pub edges: PathBuf,
}

/// Write `nodes.csv` and `edges.csv` into `dir`, replacing earlier exports.
pub async fn export_graph(dir: &Path, entities: &[Entity], relations: &[Relation]) -> Result<ExportPaths> {
    tokio::fs::create_dir_all(dir).await?;
    let paths = ExportPaths {
        nodes: dir.join(NODES_FILE),
        edges: dir.join(EDGES_FILE),
    };
    tokio::fs::write(&paths.nodes, nodes_csv(entities)).await?;
    tokio::fs::write(&paths.edges, edges_csv(relations)).await?;

    log::info!(
        "Exported {} nodes and {} edges to {}",
        entities.len(),
        relations.len(),
        dir.display()
    );
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Difficulty, EntityType, RelationType};
    use crate::store::testing::entity;
    use tempfile::TempDir;

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a, b"), "\"a, b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_nodes_csv() {
        let mut node = entity("Heart Rate Zones", EntityType::KnowledgePoint);
        node.definition = "Bands of effort, by heart rate".to_string();
        node.module = "Aerobic Training".to_string();
        node.difficulty = Difficulty::High;
        node.source_refs.insert("c2".to_string());
        node.source_refs.insert("c1".to_string());

        let csv = nodes_csv(&[node]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "id,name,type,definition,module,difficulty,source_ref");
        assert_eq!(
            lines[1],
            "KnowledgePoint:Heart Rate Zones,Heart Rate Zones,KnowledgePoint,\"Bands of effort, by heart rate\",Aerobic Training,high,c1;c2"
        );
    }

    #[test]
    fn test_edges_csv() {
        let mut relation = Relation::new("Easy Run", RelationType::PredecessorTask, "Tempo Run");
        relation.confidence = 0.8;
        relation.justification = "build base first".to_string();
        relation.source_ref = "c7".to_string();

        let csv = edges_csv(&[relation]);
        assert_eq!(
            csv,
            "head,relation,tail,confidence,justification,source_chunk\n\
             Easy Run,PREDECESSOR_TASK,Tempo Run,0.8,build base first,c7\n"
        );
    }

    #[tokio::test]
    async fn test_export_writes_both_files() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("kg_export");
        let nodes = vec![entity("A", EntityType::TeachingTask), entity("B", EntityType::TeachingTask)];
        let edges = vec![Relation::new("A", RelationType::PredecessorTask, "B")];

        let paths = export_graph(&target, &nodes, &edges).await.unwrap();
        let nodes_text = std::fs::read_to_string(&paths.nodes).unwrap();
        let edges_text = std::fs::read_to_string(&paths.edges).unwrap();
        assert_eq!(nodes_text.lines().count(), 3);
        assert_eq!(edges_text.lines().count(), 2);

        // A second pass replaces the previous export.
        export_graph(&target, &nodes[..1], &[]).await.unwrap();
        assert_eq!(std::fs::read_to_string(&paths.nodes).unwrap().lines().count(), 2);
    }
}
