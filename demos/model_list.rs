//! A list of models kept in sync with the store.
//!
//! Run with `cargo run --example model_list`.

use objectkeep::{
    CollectionChange, DatabaseManager, Field, FileKeyValueStore, ManagerConfig, Migration, ObjectSchema,
    Persistable, PersistableSliceExt, ScalarType,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Model {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    count: i64,
}

const MODEL_FIELDS: &[Field] = &[
    Field::scalar("id", ScalarType::String),
    Field::scalar("type", ScalarType::String),
    Field::scalar("count", ScalarType::Int),
];
static MODEL: ObjectSchema = ObjectSchema::new("Model", "id", MODEL_FIELDS);

impl Persistable for Model {
    type Id = String;

    fn schema() -> &'static ObjectSchema {
        &MODEL
    }

    fn id(&self) -> String {
        self.id.clone()
    }
}

fn normalize_models(migration: &mut Migration<'_>, _old: u64, _new: u64) {
    migration.enumerate_objects("Model", |_, new| {
        let count: i64 = if new.get("count").and_then(|v| v.as_i64()) == Some(0) { 1 } else { 2 };
        new.insert("count".to_string(), count.into());

        let kind = if new.get("type").and_then(|v| v.as_str()) == Some("") {
            "MigratedEmpty"
        } else {
            "MigratedNull"
        };
        new.insert("type".to_string(), kind.into());
    });
}

fn render(models: &[Model]) {
    for model in models {
        println!("  {}  Type: {} Count: {}", model.id, model.kind, model.count);
    }
}

fn main() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = FileKeyValueStore::open(dir.path().join("defaults.json"))?;
    let manager = DatabaseManager::new(store);

    let version = manager.initialize(
        ManagerConfig::new(dir.path().join("models.objectkeep"))
            .migration(normalize_models)
            .object_types(vec![&MODEL]),
    )?;
    println!("opened at schema version {}", version);

    let db = manager.database()?;
    let results = Model::all_results(&db).ok_or_else(|| anyhow::anyhow!("Model is not registered"))?;
    let mut subscription = results.observe()?;

    for count in 1..=3 {
        Model::create(&db, |model| {
            model.id = uuid::Uuid::new_v4().to_string();
            model.kind = "CreatedType".to_string();
            model.count = count;
        });
    }

    let mut models: Vec<Model> = Vec::new();
    while let Some(change) = subscription.try_recv() {
        match change {
            CollectionChange::Initial(results) => {
                println!("initial: {} models", results.len());
                models = results;
            }
            CollectionChange::Update {
                results, insertions, ..
            } => {
                println!("update: inserted at {:?}", insertions);
                models = results;
            }
            CollectionChange::Error(err) => eprintln!("{}", err),
        }
    }
    render(&models);

    models.delete_all(&db, true);
    println!("after delete: {} models", results.len());

    subscription.invalidate();
    manager.shutdown()?;
    Ok(())
}
