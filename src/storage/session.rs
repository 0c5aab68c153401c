/// How a unit of work wants its transaction to end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    /// Persist the changes and return the value
    Commit(T),
    /// Discard any changes and return the value, used for not-found outcomes
    Rollback(T),
}

impl<T> Completion<T> {
    pub fn is_commit(&self) -> bool {
        matches!(self, Completion::Commit(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Completion::Commit(value) | Completion::Rollback(value) => value,
        }
    }
}
