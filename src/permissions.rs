//! Requester classification and object-level permission checks.
//!
//! Handlers load the target object first (so a missing object is reported as
//! not-found), then ask a [`Permission`] whether the requester may act on it.

use actix_web::http::Method;

use crate::auth::{Auth, Role};
use crate::error::ApiError;
use crate::models::{Post, Profile, Thread};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    Anonymous,
    User { subject: String },
    /// Moderators and admins.
    Privileged { subject: String },
}

impl Requester {
    pub fn from_auth(auth: Option<&Auth>) -> Self {
        match auth {
            None => Requester::Anonymous,
            Some(a) if a.0.roles.iter().any(|r| matches!(r, Role::Admin | Role::Moderator)) => {
                Requester::Privileged { subject: a.0.sub.clone() }
            }
            Some(a) => Requester::User { subject: a.0.sub.clone() },
        }
    }

    pub fn subject(&self) -> Option<&str> {
        match self {
            Requester::Anonymous => None,
            Requester::User { subject } | Requester::Privileged { subject } => Some(subject),
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, Requester::Privileged { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
}

impl Action {
    /// GET, HEAD and OPTIONS are reads; everything else writes.
    pub fn from_method(method: &Method) -> Self {
        if *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS {
            Action::Read
        } else {
            Action::Write
        }
    }
}

/// Objects that belong to a single subject.
pub trait Owned {
    fn owner(&self) -> Option<&str>;
}

impl Owned for Profile {
    fn owner(&self) -> Option<&str> { Some(&self.user) }
}

impl Owned for Post {
    fn owner(&self) -> Option<&str> { Some(&self.poster_subject) }
}

/// A thread is owned by whoever created it, regardless of who posts in it.
impl Owned for Thread {
    fn owner(&self) -> Option<&str> { Some(&self.creator_subject) }
}

/// May `requester` perform `action` on `object`?
pub trait Permission<T: ?Sized> {
    fn allows(&self, requester: &Requester, action: Action, object: &T) -> bool;
}

pub struct AllowAny;

impl<T: ?Sized> Permission<T> for AllowAny {
    fn allows(&self, _: &Requester, _: Action, _: &T) -> bool { true }
}

pub struct IsAuthenticatedOrReadOnly;

impl<T: ?Sized> Permission<T> for IsAuthenticatedOrReadOnly {
    fn allows(&self, requester: &Requester, action: Action, _: &T) -> bool {
        action == Action::Read || requester.subject().is_some()
    }
}

pub struct IsPrivilegedOrReadOnly;

impl<T: ?Sized> Permission<T> for IsPrivilegedOrReadOnly {
    fn allows(&self, requester: &Requester, action: Action, _: &T) -> bool {
        action == Action::Read || requester.is_privileged()
    }
}

pub struct IsOwnerOrReadOnly;

impl<T: Owned + ?Sized> Permission<T> for IsOwnerOrReadOnly {
    fn allows(&self, requester: &Requester, action: Action, object: &T) -> bool {
        match (action, requester) {
            (Action::Read, _) => true,
            (Action::Write, Requester::Anonymous) => false,
            (Action::Write, Requester::Privileged { .. }) => true,
            (Action::Write, Requester::User { subject }) => object.owner() == Some(subject.as_str()),
        }
    }
}

pub fn check<T, P>(permission: &P, requester: &Requester, action: Action, object: &T) -> Result<(), ApiError>
where
    T: ?Sized,
    P: Permission<T>,
{
    if permission.allows(requester, action, object) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}
