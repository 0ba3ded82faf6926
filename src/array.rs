//! The provisioned array: open sessions in configuration order.

use crate::error::{AppResult, PsuError};
use crate::session::SupplySession;
use tracing::{info, warn};

/// Ordered collection of provisioned supplies.
///
/// Membership is fixed once provisioning returns; build a new array to change it.
#[derive(Debug, Default)]
pub struct SupplyArray {
    sessions: Vec<SupplySession>,
}

/// Reply of one supply to [`SupplyArray::apply_to_all`].
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyReply {
    pub supply: String,
    pub response: Option<String>,
}

impl SupplyArray {
    pub(crate) fn from_sessions(sessions: Vec<SupplySession>) -> Self {
        Self { sessions }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SupplySession> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, SupplySession> {
        self.sessions.iter_mut()
    }

    pub fn get(&self, name: &str) -> Option<&SupplySession> {
        self.sessions.iter().find(|s| s.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SupplySession> {
        self.sessions.iter_mut().find(|s| s.name() == name)
    }

    /// Supply names in configuration order.
    pub fn names(&self) -> Vec<&str> {
        self.sessions.iter().map(SupplySession::name).collect()
    }

    /// Send the same raw query and/or command to every supply, in order.
    ///
    /// The query (if any) is sent before the command. Stops at the first failure.
    pub async fn apply_to_all(
        &mut self,
        ask: Option<&str>,
        tell: Option<&str>,
    ) -> AppResult<Vec<SupplyReply>> {
        let mut replies = Vec::with_capacity(self.sessions.len());
        for session in self.sessions.iter_mut() {
            let response = match ask {
                Some(question) => Some(session.ask(question).await?),
                None => None,
            };
            if let Some(statement) = tell {
                session.tell(statement).await?;
            }
            replies.push(SupplyReply {
                supply: session.name().to_string(),
                response,
            });
        }
        Ok(replies)
    }

    /// Close every session, attempting all of them even if some fail.
    pub async fn close_all(&mut self) -> AppResult<()> {
        let mut failures = Vec::new();
        for session in self.sessions.iter_mut() {
            if let Err(err) = session.close().await {
                warn!(supply = %session.name(), error = %err, "Failed to close session");
                failures.push(err);
            }
        }
        info!(
            supplies = self.sessions.len(),
            failures = failures.len(),
            "Closed supply array"
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PsuError::TeardownFailed(failures))
        }
    }
}

impl<'a> IntoIterator for &'a SupplyArray {
    type Item = &'a SupplySession;
    type IntoIter = std::slice::Iter<'a, SupplySession>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
