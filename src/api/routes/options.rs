//! Prompt choices posted from the progress page

use super::{OptionRequest, OptionResponse};
use crate::api::state::AppState;
use crate::error::{Error, Result};
use crate::walker::{
    OPTION_EXIT, OPTION_TRY_AGAIN, OPTION_TRY_ANOTHER_NOTEBOOK, OPTION_TRY_ANOTHER_SECTION,
    list_notebooks,
};
use axum::{Json, extract::State};

/// POST /handle_option - Act on a prompt choice
///
/// Besides the fixed options, any notebook name offered by "Try another notebook" is
/// accepted and starts a walk of that notebook.
pub async fn handle_option(
    State(state): State<AppState>,
    Json(request): Json<OptionRequest>,
) -> Result<Json<OptionResponse>> {
    let progress = state.session.progress();
    let option = request.option.trim();
    progress.record(format!("User selected: {option}"));

    let status = match option {
        OPTION_EXIT => {
            progress.record("Exiting application...");
            state.shutdown.cancel();
            "exiting"
        }
        OPTION_TRY_AGAIN => {
            progress.record("Restarting image fetcher...");
            state.session.escalator().reset(None);
            restart_status(state.start_walk())
        }
        OPTION_TRY_ANOTHER_SECTION => {
            // The walk already moves past sections that fail
            progress.record("Trying another section...");
            "continuing"
        }
        OPTION_TRY_ANOTHER_NOTEBOOK => {
            progress.record("Trying another notebook...");
            let names = notebook_names(&state).await?;
            if names.is_empty() {
                progress.record("No notebooks found.");
            }
            let mut options = names;
            options.push(OPTION_EXIT.to_string());
            progress.record_prompt("Select a notebook:", options);
            "prompted"
        }
        name => {
            let names = notebook_names(&state).await?;
            if !names.iter().any(|n| n == name) {
                return Err(Error::InvalidOption(name.to_string()));
            }
            state.select_notebook(name);
            state.session.escalator().reset(None);
            progress.record(format!("Switching to notebook: {name}"));
            if state.start_walk() {
                "started"
            } else {
                progress.record("A walk is already running; the new notebook is used next time.");
                "already_running"
            }
        }
    };

    Ok(Json(OptionResponse::new(status)))
}

fn restart_status(started: bool) -> &'static str {
    if started { "restarted" } else { "already_running" }
}

async fn notebook_names(state: &AppState) -> Result<Vec<String>> {
    let notebooks = list_notebooks(state.session.as_ref()).await.map_err(|e| {
        state
            .session
            .progress()
            .record(format!("Error listing notebooks: {e}"));
        Error::Api(e)
    })?;
    Ok(notebooks.into_iter().map(|n| n.name).collect())
}
