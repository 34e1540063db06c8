use std::future::Future;
use std::pin::Pin;

use actix_web::dev::Payload;
use actix_web::web::{Form, Query};
use actix_web::{FromRequest, HttpMessage, HttpRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::Error as ServiceError;

/// Fields of the rule creation form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRule {
    pub name: Option<String>,
    pub bucket: Option<String>,
}

/// Fields of the tick form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tick {
    pub key: Option<String>,
    pub value: Option<String>,
}

const URLENCODED: &str = "application/x-www-form-urlencoded";

/// Form fields from an urlencoded body, or from the query string when the
/// request carries no urlencoded body.
///
/// Body errors (size limit, malformed encoding) are reported through the
/// app's `FormConfig` and never fall through to the query string.
#[derive(Debug)]
pub struct FormFields<T>(pub T);

impl<T> FormFields<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: DeserializeOwned + 'static> FromRequest for FormFields<T> {
    type Error = actix_web::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        if req.content_type() == URLENCODED {
            let form = Form::<T>::from_request(req, payload);
            return Box::pin(async move { Ok(FormFields(form.await?.into_inner())) });
        }

        let fields: Result<Self, actix_web::Error> = Query::<T>::from_query(req.query_string())
            .map(|query| FormFields(query.into_inner()))
            .map_err(|e| ServiceError::invalid_field("query", e.to_string()).into());
        Box::pin(async move { fields })
    }
}

/// Trimmed, non-empty value of an optional form field.
pub fn required(value: &Option<String>) -> Option<&str> {
    value
        .as_ref()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}
