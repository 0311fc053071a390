//! Hosting the `sys` bridge in the reference engine.

use std::sync::Arc;

use fusabi_sys::{
    to_value_serde, BridgeConfig, Capabilities, Engine, EngineConfig, Result, ScriptRuntime,
    SysBridge,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = BridgeConfig::default();
    let args = config.args.clone();
    let config = config.with_limit_options(
        option_value(&args, "--memory-limit"),
        option_value(&args, "--stack-size"),
    )?;

    let mut engine = Engine::new(EngineConfig::default().with_capabilities(Capabilities::all()));
    let bridge = Arc::new(SysBridge::new(config));
    bridge.attach(&mut engine)?;

    println!("=== Process ===");
    println!("exepath  = {}", engine.eval_script("sys.exepath", "<demo>")?);
    println!("platform = {}", engine.eval_script("sys.platform", "<demo>")?);
    println!("stdin tty = {}", engine.eval_script("sys.isStdinTty()", "<demo>")?);
    println!("uuid     = {}", engine.eval_script("sys.randomUUID()", "<demo>")?);

    println!("\n=== Evaluation ===");
    println!("1+1 = {}", engine.eval_script("sys.evalScript('1+1')", "<demo>")?);

    engine.add_module("answer.fsx", "export default 6 * 7");
    engine.add_module("main.fsx", "import answer from 'answer.fsx'\nanswer + 0.5");
    println!("main.fsx = {}", engine.eval_script("sys.evalFile('main.fsx')", "<demo>")?);

    match engine.eval_script("sys.evalScript('(')", "<demo>") {
        Ok(v) => println!("unexpected success: {}", v),
        Err(e) => println!("parse failure: {}", e),
    }

    println!("\n=== Tuning ===");
    engine.eval_script("sys.setMemoryLimit(8388608); sys.setMaxStackSize(65536)", "<demo>")?;
    println!(
        "heap ceiling = {}, stack ceiling = {}",
        engine.memory_limit(),
        engine.max_stack_size()
    );
    engine.eval_script("sys.gc(); sys.gc()", "<demo>")?;
    println!("collections = {}", engine.gc_runs());

    println!("\n=== Versions ===");
    let info = bridge.build_info(&engine);
    println!("{}", to_value_serde(&info)?.to_json_string());

    Ok(())
}

fn option_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}
