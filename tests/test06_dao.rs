#![cfg(feature = "sqlite")]

mod common;

use serde::{Deserialize, Serialize};
use sql_executor::prelude::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Player {
    name: String,
    score: i64,
}

async fn players() -> Result<(tempfile::TempDir, Dao<String, Player>), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let cap = ConfigAndPool::sqlite_builder(common::temp_db(&dir, "dao"))
        .build()
        .await?;
    let dao = Dao::new("players", &cap.executor(), |p: &Player| p.name.clone())?;
    dao.create_table().await?;
    Ok((dir, dao))
}

#[tokio::test(flavor = "multi_thread")]
async fn save_select_and_delete() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, dao) = players().await?;

    let ana = Player { name: "ana".into(), score: 3 };
    let bo = Player { name: "bo".into(), score: 5 };
    dao.save_all([&ana, &bo]).await?;
    assert_eq!(dao.select_all().await?.len(), 2);

    // Saving under an existing key replaces the stored document.
    let better = Player { name: "ana".into(), score: 9 };
    dao.save_one(&better).await?;
    assert_eq!(dao.select_one(&"ana".to_string()).await?, Some(better));

    dao.delete_one(&"bo".to_string()).await?;
    assert_eq!(dao.select_one(&"bo".to_string()).await?, None);
    assert_eq!(dao.select_all().await?.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_table_names_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let cap = ConfigAndPool::sqlite_builder(common::temp_db(&dir, "bad"))
        .build()
        .await?;
    let err = Dao::<String, Player>::new("players; --", &cap.executor(), |p| p.name.clone())
        .unwrap_err();
    assert!(matches!(err, SqlExecutorError::ConfigError(_)));
    Ok(())
}
