//! # Client Contract
//!
//! What web and mobile clients can rely on.
//!
//! ## Requests
//! - Every `/api` request carries `X-Tenant-Id`: letters, digits, `-` and `_`,
//!   at most 64 characters. Missing header is a `400`.
//! - JSON bodies and responses use camelCase keys.
//! - Enum values are PascalCase strings, e.g. `InProgress`, `StudentNotBoarded`.
//! - Money is integer minor units (`amountCents`).
//!
//! ## Responses
//! Always the same envelope.
//! ```json
//! { "success": true, "data": { }, "message": null }
//! ```
//!
//! Failures carry `data: null` and a readable `message`.
//!
//! | Status | Meaning                                      |
//! |--------|----------------------------------------------|
//! | 400    | validation failed or tenant header missing   |
//! | 401    | MFA code rejected                            |
//! | 404    | entity missing, deleted or in another tenant |
//! | 409    | duplicate, or trip status change not allowed |
//! | 500    | internal, details only in the server log     |
//!
//! ## Lists
//! `?page=1&pageSize=20`, page size clamped to 1..=100.
//! ```json
//! { "items": [], "page": 1, "pageSize": 20, "totalCount": 0 }
//! ```
//!
//! ## Trips
//! `Scheduled -> InProgress -> Completed`, and `Scheduled | InProgress -> Cancelled`.
//! Anything else is a `409`.
//!
//! ## MFA
//! 1. `POST /api/mfa/challenges` with `userId` and `phone`
//! 2. A 6-digit code (leading zeroes kept) arrives by SMS, valid 10 minutes
//! 3. `POST /api/mfa/verify` with `challengeId` and `code`
//!
//! A challenge verifies once and locks after 5 wrong codes.
//!
//! ## Notifications
//! `GET /api/notifications/stream` is a server-sent event stream of the
//! tenant's events. The SSE event name is the `type` field.
//! ```json
//! { "type": "TripStatusChanged", "tripId": 7, "status": "InProgress", "changedAt": "..." }
//! { "type": "EmergencyAlert", "alert": { "violationType": "SpeedViolation", "severity": "High" } }
//! ```
