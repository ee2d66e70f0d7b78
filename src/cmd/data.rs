//! Data commands: `draftline import` and `draftline db`.

use std::path::Path;

use anyhow::{Context, Result};
use draftline::store::models::{NewArticle, User};
use serde::Deserialize;

use super::super::DbCommands;
use super::Workspace;

/// Either a bundle of users and articles or a single article.
#[derive(Deserialize)]
#[serde(untagged)]
enum ImportFile {
    Bundle {
        #[serde(default)]
        users: Vec<User>,
        articles: Vec<NewArticle>,
    },
    Article(NewArticle),
}

pub async fn cmd_import(workspace: &Workspace, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read import file: {}", file.display()))?;
    let parsed: ImportFile = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse import file: {}", file.display()))?;
    let (users, articles) = match parsed {
        ImportFile::Bundle { users, articles } => (users, articles),
        ImportFile::Article(article) => (Vec::new(), vec![article]),
    };

    let db = workspace.open_db()?;
    let summary = db
        .call(move |db| {
            for user in &users {
                db.upsert_user(user)?;
            }
            let mut imported = Vec::new();
            for article in &articles {
                db.import_article(article)?;
                imported.push((article.id.clone(), article.sources.len()));
            }
            Ok((users.len(), imported))
        })
        .await?;

    let (user_count, imported) = summary;
    for (id, sources) in &imported {
        println!("Imported article {} with {} source(s)", id, sources);
    }
    if user_count > 0 {
        println!("Imported {} user(s)", user_count);
    }
    Ok(())
}

pub fn cmd_db(workspace: &Workspace, command: DbCommands) -> Result<()> {
    match command {
        DbCommands::Init => {
            let path = workspace.database_path();
            workspace.open_db()?;
            println!("Database initialized at {}", path.display());
        }
    }
    Ok(())
}
