//! Initial clients, users and roles for the in-memory store

use crate::state::{read_file, StartupError};
use oidc_engine::crypto::sha256_hex;
use oidc_engine::model::{Client, Role, User};
use oidc_engine::AuthorizationServer;
use serde::Deserialize;

/// A client entry. The secret may be given in plain text and is hashed on load.
#[derive(Debug, Deserialize)]
struct SeedClient {
    #[serde(flatten)]
    client: Client,
    #[serde(default)]
    secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    clients: Vec<SeedClient>,
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    roles: Vec<Role>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub clients: usize,
    pub users: usize,
    pub roles: usize,
}

pub fn load_file(server: &AuthorizationServer, path: &str) -> Result<SeedSummary, StartupError> {
    load_str(server, &read_file(path)?)
}

pub fn load_str(server: &AuthorizationServer, json: &str) -> Result<SeedSummary, StartupError> {
    let seed: SeedFile =
        serde_json::from_str(json).map_err(|e| StartupError::Seed(e.to_string()))?;
    let summary = SeedSummary {
        clients: seed.clients.len(),
        users: seed.users.len(),
        roles: seed.roles.len(),
    };

    // Roles before the users that reference them
    for role in seed.roles {
        server.save_role(role)?;
    }
    for user in seed.users {
        server.save_user(user)?;
    }
    for entry in seed.clients {
        server.register_client(into_client(entry)?)?;
    }
    Ok(summary)
}

fn into_client(entry: SeedClient) -> Result<Client, StartupError> {
    let SeedClient { mut client, secret } = entry;
    if let Some(secret) = secret {
        if client.secret_hash.is_some() {
            return Err(StartupError::Seed(format!(
                "client '{}' sets both secret and secret_hash",
                client.id
            )));
        }
        client.secret_hash = Some(sha256_hex(&secret));
    }
    match (client.is_confidential(), client.secret_hash.is_some()) {
        (true, false) => Err(StartupError::Seed(format!(
            "confidential client '{}' has no secret",
            client.id
        ))),
        (false, true) => Err(StartupError::Seed(format!(
            "public client '{}' must not have a secret",
            client.id
        ))),
        _ => Ok(client),
    }
}
