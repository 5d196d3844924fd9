use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TicketError, TicketResult};
use crate::registry::TicketRegistry;
use crate::ticket::{AnyTicket, Ticket};

/// Identity of a publishing node for one process run.
///
/// A restarted node gets a new `run_id`, so commands it published before the
/// restart are applied like any other node's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherIdentifier {
    pub node_id: String,
    pub run_id: Uuid,
}

impl PublisherIdentifier {
    /// Creates an identifier for `node_id` with a fresh run id.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            run_id: Uuid::new_v4(),
        }
    }
}

impl std::fmt::Display for PublisherIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node_id, self.run_id)
    }
}

/// Registry mutation carried by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    Add,
    Update,
    Delete,
    DeleteAll,
}

/// A registry mutation published to the other nodes of the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketCommand {
    pub publisher_id: PublisherIdentifier,
    pub command_type: CommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_payload: Option<AnyTicket>,
}

impl TicketCommand {
    #[must_use]
    pub fn add(publisher_id: PublisherIdentifier, ticket: AnyTicket) -> Self {
        Self::with_ticket(publisher_id, CommandType::Add, ticket)
    }

    #[must_use]
    pub fn update(publisher_id: PublisherIdentifier, ticket: AnyTicket) -> Self {
        Self::with_ticket(publisher_id, CommandType::Update, ticket)
    }

    #[must_use]
    pub fn delete(publisher_id: PublisherIdentifier, ticket_id: impl Into<String>) -> Self {
        Self {
            publisher_id,
            command_type: CommandType::Delete,
            ticket_id: Some(ticket_id.into()),
            ticket_payload: None,
        }
    }

    #[must_use]
    pub fn delete_all(publisher_id: PublisherIdentifier) -> Self {
        Self {
            publisher_id,
            command_type: CommandType::DeleteAll,
            ticket_id: None,
            ticket_payload: None,
        }
    }

    fn with_ticket(publisher_id: PublisherIdentifier, command_type: CommandType, ticket: AnyTicket) -> Self {
        Self {
            publisher_id,
            command_type,
            ticket_id: Some(ticket.id().to_string()),
            ticket_payload: Some(ticket),
        }
    }

    /// Serializes the command for the bus.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if serialization fails.
    pub fn to_bytes(&self) -> TicketResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses and validates a command received from the bus.
    ///
    /// # Errors
    ///
    /// Returns `MalformedCommand` if the bytes do not parse or the command is
    /// inconsistent.
    pub fn from_bytes(bytes: &[u8]) -> TicketResult<Self> {
        let command: Self = serde_json::from_slice(bytes)
            .map_err(|e| TicketError::malformed_command(e.to_string()))?;
        command.validate()?;
        Ok(command)
    }

    /// Checks that the command carries what its type requires.
    ///
    /// # Errors
    ///
    /// Returns `MalformedCommand` describing the first defect found.
    pub fn validate(&self) -> TicketResult<()> {
        match self.command_type {
            CommandType::Add | CommandType::Update => {
                let Some(ticket) = &self.ticket_payload else {
                    return Err(TicketError::malformed_command(format!(
                        "{:?} command without ticket payload",
                        self.command_type
                    )));
                };
                if let Some(id) = &self.ticket_id {
                    if id != ticket.id() {
                        return Err(TicketError::malformed_command(
                            "ticket id does not match payload",
                        ));
                    }
                }
                Ok(())
            }
            CommandType::Delete => match &self.ticket_id {
                Some(id) if !id.is_empty() => Ok(()),
                _ => Err(TicketError::malformed_command("Delete command without ticket id")),
            },
            CommandType::DeleteAll => Ok(()),
        }
    }

    /// Applies the command to a local registry.
    ///
    /// Idempotent: repeated `Add`/`Update` commands upsert the same state,
    /// repeated `Delete` commands for an absent id succeed.
    ///
    /// # Errors
    ///
    /// Returns `MalformedCommand` for an invalid command, or the registry's
    /// error.
    pub async fn apply(&self, registry: &dyn TicketRegistry) -> TicketResult<()> {
        self.validate()?;
        match (self.command_type, &self.ticket_payload, &self.ticket_id) {
            (CommandType::Add, Some(ticket), _) => registry.add_ticket(ticket).await,
            (CommandType::Update, Some(ticket), _) => registry.update_ticket(ticket).await,
            (CommandType::Delete, _, Some(id)) => registry.delete_single_ticket(id).await.map(|_| ()),
            (CommandType::DeleteAll, _, _) => registry.delete_all().await.map(|_| ()),
            _ => Err(TicketError::malformed_command("inconsistent command")),
        }
    }
}
