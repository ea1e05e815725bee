use crate::error::CliError;
use crate::render;
use tasklab_store::Tasks;

pub fn run(tasks: &Tasks, json: bool) -> Result<(), CliError> {
    let order = |a: &tasklab_store::Meta, b: &tasklab_store::Meta| a.created.cmp(&b.created);
    let found = tasks.query(None, Some(&order), false)?;

    let mut rows = Vec::with_capacity(found.len());
    for task in found {
        let meta = task.meta()?;
        rows.push((task, meta));
    }

    if json {
        let values: Vec<_> = rows.iter().map(|(t, m)| render::meta_json(t, m)).collect();
        println!("{}", serde_json::to_string_pretty(&values).expect("json"));
    } else {
        render::table(&rows);
    }
    Ok(())
}
