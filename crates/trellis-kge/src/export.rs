//! Embedding and run-configuration export.
//!
//! Consumer-facing output of a finished run: one CSV per embedding table
//! (label column plus one column per dimension) and a JSON dump of the
//! configuration that produced it. Export runs after training has already
//! succeeded, so callers typically log a failure here and keep the trained
//! model.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use trellis_core::Vocabulary;

use crate::error::{Error, Result};
use crate::model::EmbeddingModel;

/// Write `entity_embeddings.csv` and `relation_embeddings.csv` under `dir`.
///
/// Row labels come from the vocabularies, which must match the model's
/// table sizes.
pub fn export_embeddings_csv(
    model: &EmbeddingModel,
    entities: &Vocabulary,
    relations: &Vocabulary,
    dir: &Path,
) -> Result<()> {
    if entities.len() != model.num_entities() || relations.len() != model.num_relations() {
        return Err(Error::Config(format!(
            "vocabulary sizes {}x{} do not match model tables {}x{}",
            entities.len(),
            relations.len(),
            model.num_entities(),
            model.num_relations()
        )));
    }

    write_table(
        &dir.join("entity_embeddings.csv"),
        entities,
        model.dim(),
        model.entity_flat(),
    )?;
    write_table(
        &dir.join("relation_embeddings.csv"),
        relations,
        model.dim(),
        model.relation_flat(),
    )?;
    tracing::info!(dir = %dir.display(), "embeddings exported");
    Ok(())
}

fn write_table(path: &Path, vocab: &Vocabulary, dim: usize, table: &[f32]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write!(writer, "label")?;
    for j in 0..dim {
        write!(writer, ",d{j}")?;
    }
    writeln!(writer)?;

    for (id, label) in vocab.labels().iter().enumerate() {
        write!(writer, "{}", escape_csv(label))?;
        for value in &table[id * dim..(id + 1) * dim] {
            write!(writer, ",{value}")?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Dump a serializable run configuration as pretty JSON at `path`.
pub fn export_run_config<C: Serialize>(config: &C, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), config)?;
    Ok(())
}
