use std::collections::HashSet;

use crate::{
    api::{self, NewReply, ParentKey, QuestionId, ReplyId, Viewer},
    ValidationError,
};

/// The reply being written: what it answers, and its text so far
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CompositionController {
    target: Option<ReplyId>,
    draft: String,
}

impl CompositionController {
    pub fn new() -> CompositionController {
        CompositionController::default()
    }

    /// `None` means answering the question itself
    pub fn target(&self) -> Option<&ReplyId> {
        self.target.as_ref()
    }

    pub fn target_key(&self) -> ParentKey {
        ParentKey::from(self.target.clone())
    }

    pub fn set_target(&mut self, target: Option<ReplyId>) {
        self.target = target;
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, draft: String) {
        self.draft = draft;
    }

    /// Build the creation request for `body`, without changing anything
    pub fn build(
        &self,
        question: Option<&QuestionId>,
        viewer: &Viewer,
        body: &str,
    ) -> Result<NewReply, ValidationError> {
        let body = api::validate_body(body).ok_or(ValidationError::EmptyBody)?;
        let question_id = question.ok_or(ValidationError::NoQuestion)?;
        Ok(NewReply {
            question_id: question_id.clone(),
            parent_id: self.target.clone(),
            body: String::from(body),
            author_name: viewer.display_name.clone(),
        })
    }

    /// The reply went through: start over with a top-level reply
    pub fn finish(&mut self) {
        self.target = None;
        self.draft.clear();
    }

    /// Deleted replies can no longer be answered
    pub fn forget(&mut self, ids: &HashSet<ReplyId>) {
        if self.target.as_ref().map_or(false, |t| ids.contains(t)) {
            self.target = None;
        }
    }
}
