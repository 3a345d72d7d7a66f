//! Who else is waiting in the lobby

#[derive(Debug, Default, Clone)]
pub struct LobbyView {
    members: Vec<String>,
}

impl LobbyView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the member list with the one sent on joining.
    pub fn set_members(&mut self, members: Vec<String>) {
        self.members = members;
    }

    pub fn joined(&mut self, nickname: String) {
        if !self.members.contains(&nickname) {
            self.members.push(nickname);
        }
    }

    pub fn left(&mut self, nickname: &str) {
        self.members.retain(|member| member != nickname);
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }
}
