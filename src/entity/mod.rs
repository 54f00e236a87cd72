pub mod contribution;
pub mod expense;
pub mod expense_category;
pub mod member;
pub mod notification;
pub mod user;
