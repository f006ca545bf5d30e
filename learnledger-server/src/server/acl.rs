use super::{AppError, auth::AuthCtx};
use axum::response::Response;
use axum::{
    extract::OriginalUri,
    http::{Method, Request},
    middleware::Next,
};
use learnledger_shared::auth::Role;
use learnledger_shared::jwt::JwtClaims;
use percent_encoding::percent_decode_str;

pub async fn enforce_acl(
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(auth) = req.extensions().get::<AuthCtx>() else {
        return Err(AppError::unauthorized());
    };
    let claims = &auth.claims;

    let segs = segmented(&path);
    if !segs.as_slice().starts_with(&["api"]) {
        tracing::warn!(?segs, "ACL: path outside api scope");
        return Err(AppError::forbidden());
    }
    let rest = &segs[1..];

    let decision = match claims.role {
        Role::Admin => allow_admin(&method, rest),
        Role::Student => allow_student(&method, rest, claims),
    };

    if let Err(err) = decision {
        tracing::warn!(
            method = %method,
            path = %path,
            username = %claims.sub,
            role = ?claims.role,
            token_student = ?claims.student_id,
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

fn allow_admin(method: &Method, rest: &[&str]) -> Result<(), AppError> {
    match rest {
        ["tracks"] if *method == Method::GET => Ok(()),
        ["tracks", _, "courses"] if *method == Method::GET => Ok(()),
        ["courses", _, "sections"] if *method == Method::GET => Ok(()),
        ["challenges"] if *method == Method::GET => Ok(()),
        ["leaderboard"] if *method == Method::GET => Ok(()),
        ["students", _, "wallet"] if *method == Method::GET => Ok(()),
        ["students", _, "transactions"] if *method == Method::GET => Ok(()),
        ["students", _, "progress"] if *method == Method::GET => Ok(()),
        ["students", _, "adjustment"] if *method == Method::POST => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn allow_student(method: &Method, rest: &[&str], claims: &JwtClaims) -> Result<(), AppError> {
    match rest {
        ["tracks"] if *method == Method::GET => Ok(()),
        ["tracks", _, "courses"] if *method == Method::GET => Ok(()),
        ["courses", _, "sections"] if *method == Method::GET => Ok(()),
        ["challenges"] if *method == Method::GET => Ok(()),
        ["leaderboard"] if *method == Method::GET => Ok(()),
        ["students", student, "wallet"] if *method == Method::GET => ensure_student(claims, student),
        ["students", student, "wallet", "settings"] if *method == Method::POST => {
            ensure_student(claims, student)
        }
        ["students", student, "transactions"] if *method == Method::GET => {
            ensure_student(claims, student)
        }
        ["students", student, "progress"] if *method == Method::GET => {
            ensure_student(claims, student)
        }
        ["students", student, "tracks", _, "enroll"] if *method == Method::POST => {
            ensure_student(claims, student)
        }
        ["students", student, "sections", _, "complete"] if *method == Method::POST => {
            ensure_student(claims, student)
        }
        ["students", student, "challenges", _, "solution"] if *method == Method::POST => {
            ensure_student(claims, student)
        }
        ["students", student, "payout"] if *method == Method::POST => {
            ensure_student(claims, student)
        }
        _ => Err(AppError::forbidden()),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn decode(seg: &str) -> String {
    percent_decode_str(seg).decode_utf8_lossy().to_string()
}

fn ensure_student(claims: &JwtClaims, seg: &str) -> Result<(), AppError> {
    let expected = claims.student_id.as_ref().ok_or_else(AppError::forbidden)?;
    let provided = decode(seg);
    if expected == &provided {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}
