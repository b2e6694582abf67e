use vergen::{BuildBuilder, CargoBuilder, Emitter};
use vergen_git2::Git2Builder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let build = BuildBuilder::default().build_timestamp(true).build()?;
    let cargo = CargoBuilder::default().target_triple(true).build()?;
    let git2 = Git2Builder::default()
        .describe(true, true, None)
        .sha(true)
        .build()?;

    // Without `fail_on_error` a missing checkout yields placeholder values;
    // crates.io builds must leave the git variables unset so `--version`
    // falls back to the package version.
    let mut emitter = Emitter::default();
    emitter.fail_on_error();
    let with_git = emitter
        .add_instructions(&build)
        .and_then(|emitter| emitter.add_instructions(&cargo))
        .and_then(|emitter| emitter.add_instructions(&git2))
        .and_then(|emitter| emitter.emit());

    if with_git.is_err() {
        Emitter::default()
            .add_instructions(&build)?
            .add_instructions(&cargo)?
            .emit()?;
    }

    Ok(())
}
