use aiterm_core::runtime::is_installed;
use aiterm_core::AppContext;
use anyhow::Result;

pub fn run(ctx: &AppContext) -> Result<()> {
    let installed = match ctx.router.runtime().list_models() {
        Ok(models) => Some(models),
        Err(e) => {
            log::warn!("Model runtime unreachable: {}", e);
            None
        }
    };
    let active = ctx.catalog.active_id();

    for model in ctx.catalog.list() {
        let marker = if active.as_deref() == Some(model.id.as_str()) {
            "*"
        } else {
            " "
        };
        let status = match installed {
            Some(ref installed) if is_installed(installed, &model.id) => "installed",
            Some(_) => "not installed",
            None => "unknown",
        };
        let tags: Vec<&str> = model.capability_tags.iter().map(String::as_str).collect();
        println!(
            "{} {:<16} {:<16} {:>5} {:>7} ctx  {:<14} [{}]",
            marker,
            model.id,
            model.display_name,
            model.size_class,
            model.max_context_tokens,
            status,
            tags.join(", ")
        );
    }
    Ok(())
}
