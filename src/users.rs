use sea_orm::{ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait, QueryFilter, Set};
use tracing::info;

use crate::{
    db::{Database, Error, FieldError},
    entity::user,
};

pub(crate) fn check_email(email: &str, errors: &mut Vec<FieldError>) {
    let email = email.trim();
    if email.is_empty() {
        errors.push(FieldError::new("email", "Email is required."));
    } else if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        errors.push(FieldError::new("email", "Please provide a valid email address."));
    }
}

impl Database {
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        role: user::Role,
    ) -> Result<user::Model, Error> {
        let mut errors = Vec::new();
        if name.trim().is_empty() {
            errors.push(FieldError::new("name", "Name is required."));
        }
        check_email(email, &mut errors);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        let user = user::ActiveModel {
            id: NotSet,
            name: Set(name.trim().to_owned()),
            email: Set(email.trim().to_owned()),
            role: Set(role),
            created_at: Set(self.now()),
        }
        .insert(&self.pool)
        .await?;

        info!(user_id = user.id, role = ?user.role, "User created");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: i64) -> Result<user::Model, Error> {
        user::Entity::find_by_id(user_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("user", user_id))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<user::Model>, Error> {
        Ok(user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(&self.pool)
            .await?)
    }
}
