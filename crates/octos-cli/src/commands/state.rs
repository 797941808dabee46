//! `octos status` / `octos clean`.

use std::path::Path;

use octos_core::store::CheckpointStore;

use super::{print_json, Paths};

/// Show the saved checkpoint of a pipeline, if any.
pub async fn status(paths: &Paths, pipeline_file: &Path, json: bool) -> Result<(), String> {
    let store = CheckpointStore::new(&paths.state_root);
    let record = store.load(pipeline_file).await.map_err(|e| e.to_string())?;

    let Some(record) = record else {
        if json {
            print_json(&serde_json::Value::Null);
        } else {
            println!("No checkpoint for {}", pipeline_file.display());
        }
        return Ok(());
    };

    if json {
        let value = serde_json::to_value(&record).map_err(|e| e.to_string())?;
        print_json(&value);
        return Ok(());
    }

    println!("📌 Checkpoint: {}", store.path_for(pipeline_file).display());
    println!("   Pipeline: {}", record.pipeline_file);
    println!("   Last completed step: {}", record.last_completed_step + 1);
    println!("   Started: {}", record.start_time.to_rfc3339());
    println!("   Updated: {}", record.last_update.to_rfc3339());
    println!("   Outputs:");
    for (name, output) in &record.outputs {
        println!("     - {} ({} bytes)", name, output.len());
    }
    Ok(())
}

/// Delete the saved checkpoint so the next run starts from the first step.
pub async fn clean(paths: &Paths, pipeline_file: &Path) -> Result<(), String> {
    let store = CheckpointStore::new(&paths.state_root);
    store.clear(pipeline_file).await.map_err(|e| e.to_string())?;
    println!("✓ State cleared for {}", pipeline_file.display());
    Ok(())
}
