use uuid::Uuid;

/// Identity of one collaboration socket for its whole lifetime.
///
/// A connection is scoped to a single file; switching files means reconnecting.
#[derive(Clone, Debug)]
pub struct ConnCtx {
    pub connection_id: Uuid,
    pub username: String,
    pub path: String,
}

impl ConnCtx {
    pub fn new(username: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            username: username.into(),
            path: path.into(),
        }
    }
}

impl std::fmt::Display for ConnCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} [{}]", self.username, self.path, self.connection_id)
    }
}
