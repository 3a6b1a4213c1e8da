use anyhow::Result;
use chrono::Utc;
use log::*;
use r2d2::{self, Pool};
use rand::prelude::*;
use serde::Deserialize;
use thiserror::Error;

use infra::documents::DocMeta;
use infra::ids::Id;
use infra::persistence::Storage;

use crate::services::{Commandable, Queryable, Request};

mod models;

pub use models::{Role, User, UserStatus, UserView};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Error)]
pub enum UserError {
    #[error("user not found")]
    NotFound,
    #[error("the username {0:?} is taken")]
    DuplicateUsername(String),
    #[error("passwords need at least 6 characters")]
    WeakPassword,
    #[error("invalid username or password")]
    BadCredentials,
    #[error("this account has been deactivated")]
    Inactive,
    #[error("cannot remove the last admin")]
    LastAdmin,
}

#[derive(Debug)]
pub struct Users<M: r2d2::ManageConnection> {
    db: Pool<M>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub display_name: Option<String>,
    pub role: Option<Role>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateUser {
    pub id: Id<User>,
    pub patch: UserPatch,
}

#[derive(Debug, Clone)]
pub struct SetUserStatus {
    pub id: Id<User>,
    pub status: UserStatus,
}

#[derive(Debug, Clone)]
pub struct DeleteUser {
    pub id: Id<User>,
}

#[derive(Debug, Clone)]
pub struct GetUser {
    pub id: Id<User>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListUsers {
    #[serde(rename = "q")]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Authenticate {
    pub username: String,
    pub password: String,
}

impl Request for CreateUser {
    type Resp = UserView;
}
impl Request for UpdateUser {
    type Resp = UserView;
}
impl Request for SetUserStatus {
    type Resp = UserView;
}
impl Request for DeleteUser {
    type Resp = ();
}
impl Request for GetUser {
    type Resp = UserView;
}
impl Request for ListUsers {
    type Resp = Vec<UserView>;
}
impl Request for Authenticate {
    type Resp = UserView;
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Users<M> {
    pub fn new(db: Pool<M>) -> Self {
        Users { db }
    }

    /// Creates the default admin and staff accounts on an empty store.
    pub fn setup(&self) -> Result<()> {
        let mut docs = self.db.get()?;
        if !docs.all::<User>()?.is_empty() {
            debug!("Users already present");
            return Ok(());
        }
        warn!("Creating default accounts; change their passwords");
        for &(username, password, display_name, role) in &[
            ("admin", "admin123", "Administrator", Role::Admin),
            ("staff", "staff123", "Staff", Role::Staff),
        ] {
            let mut user = new_user(username, password, display_name, role)?;
            docs.save(&mut user)?;
        }
        Ok(())
    }

    fn load_user(docs: &mut D, id: &Id<User>) -> Result<User> {
        Ok(docs.load(id)?.ok_or(UserError::NotFound)?)
    }

    fn check_username_free(docs: &mut D, username: &str) -> Result<()> {
        let taken = docs
            .all::<User>()?
            .into_iter()
            .any(|user| user.username.eq_ignore_ascii_case(username));
        if taken {
            return Err(UserError::DuplicateUsername(username.to_string()).into());
        }
        Ok(())
    }
}

fn check_password(password: &str) -> Result<(), UserError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(UserError::WeakPassword);
    }
    Ok(())
}

fn new_user(username: &str, password: &str, display_name: &str, role: Role) -> Result<User> {
    check_password(password)?;
    let now = Utc::now();
    Ok(User {
        meta: DocMeta::new_with_id(thread_rng().gen()),
        username: username.to_string(),
        password_hash: bcrypt::hash(password, bcrypt::DEFAULT_COST)?,
        display_name: display_name.to_string(),
        role,
        status: UserStatus::Active,
        created_at: now,
        updated_at: now,
    })
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<CreateUser> for Users<M>
{
    fn execute(&self, req: CreateUser) -> Result<UserView> {
        let mut docs = self.db.get()?;
        Self::check_username_free(&mut docs, &req.username)?;
        let mut user = new_user(&req.username, &req.password, &req.display_name, req.role)?;
        docs.save(&mut user)?;
        info!("Created {:?} account {}", user.role, user.username);
        Ok(user.into())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<UpdateUser> for Users<M>
{
    fn execute(&self, req: UpdateUser) -> Result<UserView> {
        let UpdateUser { id, patch } = req;
        let mut docs = self.db.get()?;
        let mut user = Self::load_user(&mut docs, &id)?;

        if let Some(display_name) = patch.display_name {
            user.display_name = display_name;
        }
        if let Some(role) = patch.role {
            if user.role == Role::Admin && role != Role::Admin {
                Self::check_other_admin_exists(&mut docs, &id)?;
            }
            user.role = role;
        }
        if let Some(password) = patch.password {
            check_password(&password)?;
            user.password_hash = bcrypt::hash(&password, bcrypt::DEFAULT_COST)?;
        }
        user.updated_at = Utc::now();
        docs.save(&mut user)?;
        Ok(user.into())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<SetUserStatus> for Users<M>
{
    fn execute(&self, req: SetUserStatus) -> Result<UserView> {
        let mut docs = self.db.get()?;
        let mut user = Self::load_user(&mut docs, &req.id)?;
        user.status = req.status;
        user.updated_at = Utc::now();
        docs.save(&mut user)?;
        info!("Account {} is now {:?}", user.username, user.status);
        Ok(user.into())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Users<M> {
    fn check_other_admin_exists(docs: &mut D, but: &Id<User>) -> Result<()> {
        let another = docs
            .all::<User>()?
            .into_iter()
            .any(|u| u.role == Role::Admin && &u.meta.id != but);
        if !another {
            return Err(UserError::LastAdmin.into());
        }
        Ok(())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<DeleteUser> for Users<M>
{
    fn execute(&self, req: DeleteUser) -> Result<()> {
        let mut docs = self.db.get()?;
        let user = Self::load_user(&mut docs, &req.id)?;
        if user.role == Role::Admin {
            Self::check_other_admin_exists(&mut docs, &req.id)?;
        }
        docs.delete(&req.id)?;
        info!("Deleted account {}", user.username);
        Ok(())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<GetUser>
    for Users<M>
{
    fn query(&self, req: GetUser) -> Result<UserView> {
        let mut docs = self.db.get()?;
        Ok(Self::load_user(&mut docs, &req.id)?.into())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ListUsers>
    for Users<M>
{
    fn query(&self, req: ListUsers) -> Result<Vec<UserView>> {
        let mut docs = self.db.get()?;
        let needle = req.search.as_deref().map(|s| s.to_lowercase());
        let mut users = docs
            .all::<User>()?
            .into_iter()
            .filter(|u| {
                needle.as_deref().map_or(true, |q| {
                    u.username.to_lowercase().contains(q)
                        || u.display_name.to_lowercase().contains(q)
                })
            })
            .map(UserView::from)
            .collect::<Vec<_>>();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<Authenticate> for Users<M>
{
    fn query(&self, req: Authenticate) -> Result<UserView> {
        let mut docs = self.db.get()?;
        let user = docs
            .all::<User>()?
            .into_iter()
            .find(|u| u.username.eq_ignore_ascii_case(&req.username))
            .ok_or(UserError::BadCredentials)?;
        if !user.verify_password(&req.password) {
            return Err(UserError::BadCredentials.into());
        }
        if user.status != UserStatus::Active {
            return Err(UserError::Inactive.into());
        }
        debug!("Authenticated {}", user.username);
        Ok(user.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::junk_drawer;
    use infra::memory::MemoryManager;

    fn users() -> Users<MemoryManager> {
        Users::new(junk_drawer::pool())
    }

    fn maria() -> CreateUser {
        CreateUser {
            username: "maria".to_string(),
            password: "kusina123".to_string(),
            display_name: "Maria".to_string(),
            role: Role::Staff,
        }
    }

    #[test]
    fn setup_creates_default_accounts_once() {
        let users = users();
        users.setup().expect("setup");
        let listed = users.query(ListUsers::default()).expect("list");
        assert_eq!(2, listed.len());

        users.setup().expect("setup again");
        let listed = users.query(ListUsers::default()).expect("list");
        assert_eq!(2, listed.len());
    }

    #[test]
    fn create_rejects_duplicate_usernames() {
        let users = users();
        users.execute(maria()).expect("create");

        let mut dup = maria();
        dup.username = "MARIA".to_string();
        let err = users.execute(dup).expect_err("duplicate");
        assert!(matches!(
            err.downcast_ref::<UserError>(),
            Some(UserError::DuplicateUsername(_))
        ));
    }

    #[test]
    fn create_rejects_short_passwords() {
        let users = users();
        let mut req = maria();
        req.password = "abc".to_string();
        let err = users.execute(req).expect_err("weak");
        assert!(matches!(
            err.downcast_ref::<UserError>(),
            Some(UserError::WeakPassword)
        ));
    }

    #[test]
    fn authenticates_active_accounts() {
        let users = users();
        let view = users.execute(maria()).expect("create");

        let authed = users
            .query(Authenticate {
                username: "maria".to_string(),
                password: "kusina123".to_string(),
            })
            .expect("authenticate");
        assert_eq!(view, authed);
    }

    #[test]
    fn rejects_wrong_passwords_and_unknown_users() {
        let users = users();
        users.execute(maria()).expect("create");

        for (username, password) in &[("maria", "wrong"), ("nobody", "kusina123")] {
            let err = users
                .query(Authenticate {
                    username: username.to_string(),
                    password: password.to_string(),
                })
                .expect_err("bad credentials");
            assert!(matches!(
                err.downcast_ref::<UserError>(),
                Some(UserError::BadCredentials)
            ));
        }
    }

    #[test]
    fn deactivated_accounts_cannot_sign_in() {
        let users = users();
        let view = users.execute(maria()).expect("create");
        users
            .execute(SetUserStatus {
                id: view.id,
                status: UserStatus::Inactive,
            })
            .expect("deactivate");

        let err = users
            .query(Authenticate {
                username: "maria".to_string(),
                password: "kusina123".to_string(),
            })
            .expect_err("inactive");
        assert!(matches!(
            err.downcast_ref::<UserError>(),
            Some(UserError::Inactive)
        ));
    }

    #[test]
    fn update_can_change_password() {
        let users = users();
        let view = users.execute(maria()).expect("create");

        users
            .execute(UpdateUser {
                id: view.id,
                patch: UserPatch {
                    password: Some("bagong-password".to_string()),
                    ..Default::default()
                },
            })
            .expect("update");

        users
            .query(Authenticate {
                username: "maria".to_string(),
                password: "bagong-password".to_string(),
            })
            .expect("authenticate with new password");
    }

    #[test]
    fn the_last_admin_is_protected() {
        let users = users();
        users.setup().expect("setup");
        let listed = users.query(ListUsers::default()).expect("list");
        let admin = listed
            .iter()
            .find(|u| u.role == Role::Admin)
            .expect("admin");

        let err = users
            .execute(DeleteUser { id: admin.id })
            .expect_err("delete last admin");
        assert!(matches!(
            err.downcast_ref::<UserError>(),
            Some(UserError::LastAdmin)
        ));

        let err = users
            .execute(UpdateUser {
                id: admin.id,
                patch: UserPatch {
                    role: Some(Role::Staff),
                    ..Default::default()
                },
            })
            .expect_err("demote last admin");
        assert!(matches!(
            err.downcast_ref::<UserError>(),
            Some(UserError::LastAdmin)
        ));
    }

    #[test]
    fn search_matches_username_or_display_name() {
        let users = users();
        users.execute(maria()).expect("create");
        users
            .execute(CreateUser {
                username: "jose".to_string(),
                password: "kusina123".to_string(),
                display_name: "Jose Rizal".to_string(),
                role: Role::Staff,
            })
            .expect("create");

        let found = users
            .query(ListUsers {
                search: Some("rizal".to_string()),
            })
            .expect("search");
        assert_eq!(1, found.len());
        assert_eq!("jose", found[0].username);
    }
}
