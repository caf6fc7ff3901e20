//! Options merged across sections and read by content producers.

use std::fs;

use koti_lib::item::{File, OptionItem};
use koti_lib::section::Section;

use super::common::{TestEnv, me};

#[test]
fn merged_values_follow_section_order() {
  let env = TestEnv::new();
  let path = env.path("etc/x.conf");
  let sections = vec![
    Section::new("zz-late").item(OptionItem::new("X").value("b")),
    Section::new("aa-early").item(OptionItem::new("X").value("a")),
    Section::new("render").item(
      File::new(&path)
        .owner(me())
        .content_fn(|model| {
          let values = model.option::<String>("X")?;
          Ok(format!("X={}\n", values.values().join(" ")).into_bytes())
        }),
    ),
  ];

  env.apply(sections);
  assert_eq!(fs::read_to_string(&path).unwrap(), "X=a b\n");
}

#[test]
fn undeclared_option_reads_as_empty() {
  let env = TestEnv::new();
  let path = env.path("etc/y.conf");
  let sections = vec![Section::new("render").item(File::new(&path).owner(me()).content_fn(|model| {
    let values = model.option::<String>("missing")?;
    Ok(format!("{}\n", values.values().len()).into_bytes())
  }))];

  env.apply(sections);
  assert_eq!(fs::read_to_string(&path).unwrap(), "0\n");
}
