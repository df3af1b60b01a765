#[derive(
    Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct QuestionId(pub String);

impl From<&str> for QuestionId {
    fn from(id: &str) -> QuestionId {
        QuestionId(String::from(id))
    }
}

impl std::fmt::Display for QuestionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Question {
    pub id: QuestionId,
    pub title: String,
    pub body: String,
    pub author_name: String,

    /// Free-form label for the age of the child the question is about
    pub child_age_label: String,

    pub like_count: u64,
    pub reply_count: u64,

    /// Whether the viewer already liked this question, if the store knows
    #[serde(default)]
    pub liked_by_me: Option<bool>,

    /// Whether the viewer already saved this question, if the store knows
    #[serde(default)]
    pub saved_by_me: Option<bool>,
}
