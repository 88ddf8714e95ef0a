//! Server-rendered pages
//!
//! Deliberately tiny: the player and chat client are static scripts, the
//! pages only wire them together with the configured title.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};

use super::server::HttpState;
use crate::chat::command::help_text;
use crate::chat::emotes::escape_html;
use crate::chat::Role;

fn layout(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<link rel="stylesheet" href="/static/css/site.css">
</head>
<body>
{body}
</body>
</html>
"#,
        title = escape_html(title),
    ))
}

pub async fn landing(State(state): State<HttpState>) -> Html<String> {
    let status = if state.registry.is_live().await {
        format!(
            "Live now with {} watching.",
            state.registry.viewer_count().await
        )
    } else {
        "Nothing is streaming right now.".to_string()
    };

    layout(
        &state.config.page_title,
        &format!(
            r#"<main class="landing">
<h1>{title}</h1>
<p class="status">{status}</p>
<nav><a href="/video">Watch with chat</a> <a href="/chat">Chat only</a> <a href="/help">Help</a></nav>
</main>"#,
            title = escape_html(&state.config.page_title),
        ),
    )
}

fn room_page(state: &HttpState, with_video: bool) -> Html<String> {
    let video = if with_video {
        r#"<section id="player"><video id="video" controls autoplay muted></video></section>"#
    } else {
        ""
    };
    layout(
        &state.config.page_title,
        &format!(
            r#"<main class="room">
{video}
<section id="chat">
<div id="messages"></div>
<form id="join"><input id="name" placeholder="Name" maxlength="36" autocomplete="off"><button>Join</button></form>
<form id="send" hidden><input id="text" autocomplete="off"><button>Send</button></form>
</section>
</main>
<script src="/static/js/chat.js"></script>"#,
        ),
    )
}

pub async fn chat(State(state): State<HttpState>) -> Html<String> {
    room_page(&state, false)
}

pub async fn video(State(state): State<HttpState>) -> Html<String> {
    room_page(&state, true)
}

pub async fn help(State(state): State<HttpState>) -> Html<String> {
    let emotes = state
        .chat
        .emotes()
        .entries()
        .into_iter()
        .map(|(name, file)| {
            format!(
                r#"<li><img src="/emotes/{file}" alt=""> {name}</li>"#,
                file = escape_html(file),
                name = escape_html(name)
            )
        })
        .collect::<String>();

    layout(
        &format!("{} - help", state.config.page_title),
        &format!(
            r#"<main class="help">
<h1>Chat help</h1>
<p>{user}</p>
<p>Moderators and admins: {staff}</p>
<h2>Emotes</h2>
<ul class="emotes">{emotes}</ul>
</main>"#,
            user = escape_html(&help_text(Role::User)),
            staff = escape_html(&help_text(Role::Admin)),
        ),
    )
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "404 page not found")
}
