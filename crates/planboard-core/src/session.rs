//! Edit sessions.
//!
//! Every editable view follows the same flow:
//! `idle -> editing -> (save | delete | cancel) -> idle`. The state lives in
//! one [`Editor`] value owned by the view. Closing a session yields a
//! [`Persist`] action for the caller to run against the store; the editor
//! itself never touches persistence.

use tracing::debug;

/// Forms know whether they carry enough input to be saved.
pub trait Form {
    /// `true` when the required text field is empty after trimming.
    fn is_blank(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditMode<Id> {
    Add,
    Edit(Id),
}

/// The transient state of one open editor: what is edited, how, and the
/// current field values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession<K, Id, F> {
    pub target: K,
    pub mode: EditMode<Id>,
    pub form: F,
}

/// What closing a session asks the store to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persist<K, Id, F> {
    Insert { target: K, form: F },
    Update { target: K, id: Id, form: F },
    Delete { id: Id },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State<K, Id, F> {
    Idle,
    Editing(EditSession<K, Id, F>),
    ConfirmingDelete { id: Id },
}

/// Edit-session state machine for one view.
#[derive(Debug, Clone)]
pub struct Editor<K, Id, F> {
    state: State<K, Id, F>,
    locked: bool,
}

impl<K, Id, F> Default for Editor<K, Id, F> {
    fn default() -> Self {
        Self {
            state: State::Idle,
            locked: false,
        }
    }
}

impl<K, Id, F> Editor<K, Id, F>
where
    K: std::fmt::Debug,
    Id: std::fmt::Debug,
    F: Form,
{
    pub fn new(locked: bool) -> Self {
        Self {
            state: State::Idle,
            locked,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    pub fn session(&self) -> Option<&EditSession<K, Id, F>> {
        match &self.state {
            State::Editing(session) => Some(session),
            _ => None,
        }
    }

    pub fn form_mut(&mut self) -> Option<&mut F> {
        match &mut self.state {
            State::Editing(session) => Some(&mut session.form),
            _ => None,
        }
    }

    /// Id awaiting delete confirmation, if any.
    pub fn pending_delete(&self) -> Option<&Id> {
        match &self.state {
            State::ConfirmingDelete { id } => Some(id),
            _ => None,
        }
    }

    /// Opens a blank session for `target`. Returns `false` while locked.
    pub fn open_add(&mut self, target: K, blank: F) -> bool {
        self.open(EditSession {
            target,
            mode: EditMode::Add,
            form: blank,
        })
    }

    /// Opens a session populated from an existing record.
    pub fn open_edit(&mut self, target: K, id: Id, current: F) -> bool {
        self.open(EditSession {
            target,
            mode: EditMode::Edit(id),
            form: current,
        })
    }

    fn open(&mut self, session: EditSession<K, Id, F>) -> bool {
        if self.locked {
            debug!(cell = ?session.target, "editor locked; ignoring open");
            return false;
        }
        if !self.is_idle() {
            debug!("replacing open edit session");
        }
        debug!(cell = ?session.target, mode = ?session.mode, "opened edit session");
        self.state = State::Editing(session);
        true
    }

    /// Closes the session with an insert or update. A blank form is
    /// rejected: nothing is returned and the session stays open.
    pub fn save(&mut self) -> Option<Persist<K, Id, F>> {
        match &self.state {
            State::Editing(session) if session.form.is_blank() => {
                debug!(cell = ?session.target, "blank form; save ignored");
                return None;
            }
            State::Editing(_) => {}
            _ => return None,
        }

        let State::Editing(session) = std::mem::replace(&mut self.state, State::Idle) else {
            return None;
        };
        Some(match session.mode {
            EditMode::Add => Persist::Insert {
                target: session.target,
                form: session.form,
            },
            EditMode::Edit(id) => Persist::Update {
                target: session.target,
                id,
                form: session.form,
            },
        })
    }

    /// Closes an edit-mode session with a delete. In add mode there is
    /// nothing to delete and the session is simply closed.
    pub fn delete(&mut self) -> Option<Persist<K, Id, F>> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Editing(EditSession {
                mode: EditMode::Edit(id),
                ..
            }) => Some(Persist::Delete { id }),
            State::Editing(_) => None,
            other => {
                self.state = other;
                None
            }
        }
    }

    pub fn cancel(&mut self) {
        if !self.is_idle() {
            debug!("edit session cancelled");
        }
        self.state = State::Idle;
    }

    /// Asks for confirmation before deleting `id`. Returns `false` while
    /// locked.
    pub fn request_delete(&mut self, id: Id) -> bool {
        if self.locked {
            debug!(?id, "editor locked; ignoring delete request");
            return false;
        }
        self.state = State::ConfirmingDelete { id };
        true
    }

    pub fn confirm(&mut self) -> Option<Persist<K, Id, F>> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::ConfirmingDelete { id } => Some(Persist::Delete { id }),
            other => {
                self.state = other;
                None
            }
        }
    }

    pub fn dismiss(&mut self) {
        if self.pending_delete().is_some() {
            self.state = State::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EditMode, Editor, Form, Persist};

    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    struct Text(String);

    impl Form for Text {
        fn is_blank(&self) -> bool {
            self.0.trim().is_empty()
        }
    }

    type TestEditor = Editor<&'static str, u32, Text>;

    #[test]
    fn add_then_save_inserts() {
        let mut editor = TestEditor::default();
        assert!(editor.open_add("mon-08:00", Text::default()));
        assert_eq!(
            editor.session().map(|s| s.mode.clone()),
            Some(EditMode::Add)
        );

        editor.form_mut().expect("open form").0 = "Maths".to_string();
        assert_eq!(
            editor.save(),
            Some(Persist::Insert {
                target: "mon-08:00",
                form: Text("Maths".to_string())
            })
        );
        assert!(editor.is_idle());
    }

    #[test]
    fn blank_save_keeps_session_open() {
        let mut editor = TestEditor::default();
        editor.open_add("2026-10-16", Text("   ".to_string()));
        assert_eq!(editor.save(), None);
        assert!(editor.session().is_some());

        editor.cancel();
        assert!(editor.is_idle());
        assert_eq!(editor.save(), None);
    }

    #[test]
    fn edit_mode_updates_and_deletes() {
        let mut editor = TestEditor::default();
        editor.open_edit("tue-09:00", 7, Text("Physics".to_string()));
        assert_eq!(
            editor.save(),
            Some(Persist::Update {
                target: "tue-09:00",
                id: 7,
                form: Text("Physics".to_string())
            })
        );

        editor.open_edit("tue-09:00", 7, Text("Physics".to_string()));
        assert_eq!(editor.delete(), Some(Persist::Delete { id: 7 }));
        assert!(editor.is_idle());
    }

    #[test]
    fn delete_in_add_mode_just_closes() {
        let mut editor = TestEditor::default();
        editor.open_add("wed-10:00", Text("draft".to_string()));
        assert_eq!(editor.delete(), None);
        assert!(editor.is_idle());
    }

    #[test]
    fn confirm_delete_flow() {
        let mut editor = TestEditor::default();
        assert!(editor.request_delete(3));
        assert_eq!(editor.pending_delete(), Some(&3));
        editor.dismiss();
        assert!(editor.is_idle());

        editor.request_delete(4);
        assert_eq!(editor.confirm(), Some(Persist::Delete { id: 4 }));
        assert_eq!(editor.confirm(), None);
    }

    #[test]
    fn locked_editor_refuses_to_open() {
        let mut editor = TestEditor::new(true);
        assert!(!editor.open_add("thu-08:00", Text::default()));
        assert!(!editor.request_delete(1));
        assert!(editor.is_idle());

        editor.set_locked(false);
        assert!(editor.open_add("thu-08:00", Text::default()));
    }
}
