//! Destination-site selectors, gathered in one place so the state machine
//! reads as control flow rather than CSS.

use regex::Regex;
use std::sync::OnceLock;

// ── Login / navigation ───────────────────────────────────────────────────────

pub const SIGN_IN_BUTTON: &str = "a.h-login__btn--sign-in.js-loginform-trigger";
pub const USERNAME_FIELD: &str = "input.js-login-uname[name='uname']";
pub const PASSWORD_FIELD: &str = "input.js-login-pass[name='pass']";
pub const LOGIN_SUBMIT: &str = "button[type='submit'], input[type='submit']";
pub const UPLOAD_NAV_BUTTON: &str = "a.upload-btn.upload-btn--big.upload-btn--green";

/// Markers that indicate a login form is on screen (not authenticated).
pub const LOGIN_FORM_MARKERS: &[&str] = &[
    "input.js-login-uname",
    "input.js-login-pass",
    "form.js-loginform",
];

/// Markers only present for an authenticated session.
pub const AUTHENTICATED_MARKERS: &[&str] = &["a.upload-btn", "a#js-upload", ".h-user__menu"];

// ── Upload surface / item discovery ──────────────────────────────────────────

pub const UPLOAD_COUNT_BADGE: &str = "a#js-upload span";
pub const READY_ITEM_CONTAINER: &str = "div.js-readyToSubmit";
pub const READY_EDIT_LINKS: &str = "div.js-readyToSubmit a.js-upload-edit";

/// Broader fallbacks when the primary ready-to-submit pattern yields nothing.
pub const DISCOVERY_FALLBACKS: &[&str] = &["a.js-upload-edit", "div.upload-item a"];

/// An edit target looks like a path segment followed by a numeric identifier
/// (`/editimage/31415926`, `/submit/271828?tab=meta`, ...).
pub fn edit_target_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/[A-Za-z][A-Za-z0-9_-]*/[0-9]+([/?#]|$)").expect("valid edit-target pattern")
    })
}

// ── Edit surface ─────────────────────────────────────────────────────────────

pub const ORIGINAL_FILENAME: &str = "#js-originalfilename";
pub const TITLE_FIELD: &str = "input#title";
pub const DESCRIPTION_FIELD: &str = "textarea#description";
pub const PREVIEW_REGION: &str = ".upload-item.submit";
pub const NEXT_SUBMIT: &str = "#js-next-submit";
pub const DELETE_SUBMIT: &str = "a#js-delete-submit";
pub const SUBMIT_BUTTON: &str = "a#submitbutton";

// ── Categorization / releases / exclusivity ──────────────────────────────────

pub const CATEGORY_REMOVE: &str = "#js-remove-cat3 > i";
pub const CATEGORY_SELECT: &str = "#M_Category_3";
pub const SUBCATEGORY_SELECT: &str = "#M_Subcategory_3";
/// Destination category codes for AI-generated imagery.
pub const AI_CATEGORY_CODE: &str = "172";
pub const AI_SUBCATEGORY_CODE: &str = "212";

pub const MODEL_RELEASE_BUTTON: &str = "#js-mr-href";
pub const MODEL_RELEASE_FIRST_OPTION: &str =
    "#js-mr-list > div.popup-release__list > div > div > div > label";

pub const EXCLUSIVE_TOGGLE: &str = "#js-exclusively > div > label";
pub const EXCLUSIVE_CONFIRM: &str = "button.btn.button.green.js-confirm";

// ── Challenge / guard markers ────────────────────────────────────────────────

/// Selectors whose presence indicates an anti-automation challenge overlay.
pub const CHALLENGE_SELECTORS: &[&str] = &[
    "iframe[src*='challenge']",
    "iframe[title*='challenge']",
    "#px-captcha",
    "div.captcha__human",
];

/// Body-text fragments that indicate a challenge (matched case-insensitively).
pub const CHALLENGE_TEXT_MARKERS: &[&str] = &[
    "press & hold",
    "press and hold",
    "checking your browser",
    "verification required",
    "just a moment",
];

/// Title fragments that indicate a challenge/denial page.
pub const CHALLENGE_TITLE_MARKERS: &[&str] = &["denied", "blocked"];

/// Title fragments that indicate a dead/stuck page.
pub const ERROR_TITLE_MARKERS: &[&str] = &[
    "error",
    "not available",
    "problem loading",
    "took too long",
    "no internet",
];
