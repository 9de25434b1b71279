use aiterm_core::AppContext;
use anyhow::Result;

use super::print_stream;

pub fn run(ctx: &AppContext, prompt: &str, stream: bool) -> Result<()> {
    ctx.bootstrap();

    if stream {
        return print_stream(ctx.router.query_streaming(prompt, None, None)?);
    }
    let answer = ctx.router.query(prompt, None, None)?;
    println!("{}", answer);
    Ok(())
}
