//! Invariants of resolution and rendering, each checked over a handful of inputs.

use anyhow::Result;
use velocity_cli::backend::Backend;
use velocity_cli::templating::{Instruction, parse, render};
use velocity_cli::test_utils::{ImageRepoFixture, test_options};
use velocity_cli::variables::{Layer, VariableStore};
use velocity_cli::version::SelectionPolicy;

use crate::common::{SCRATCH, labels, resolve, resolve_with};

fn store(pairs: &[(&str, &str)]) -> VariableStore {
    let mut store = VariableStore::new();
    store.extend(pairs.iter().copied(), Layer::Specification);
    store
}

#[test]
fn test_selection_ignores_dependency_declaration_order() -> Result<()> {
    let orders = ["[left, right, middle]", "[right, middle, left]", "[middle, left, right]"];
    let mut outcomes = Vec::new();

    for order in orders {
        let repo = ImageRepoFixture::new()?
            .image("base", "versions: [{ spec: ['1', '2', '3', '4', '5', '6'] }]", SCRATCH)?
            .image("left", "versions: [{ spec: '1' }]\ndependencies: ['base@2:5']", SCRATCH)?
            .image("right", "versions: [{ spec: '1' }]\ndependencies: ['base@3:4']", SCRATCH)?
            .image("middle", "versions: [{ spec: '1' }]\ndependencies: ['base@>=2']", SCRATCH)?
            .image("app", &format!("versions: [{{ spec: '1' }}]\ndependencies: {order}"), SCRATCH)?;
        let chain = resolve(&repo, "app")?;

        let mut selected = labels(&chain);
        selected.sort();
        outcomes.push(selected);
    }

    assert!(outcomes[0].contains(&"base@4".to_string()), "{:?}", outcomes[0]);
    assert!(outcomes.windows(2).all(|w| w[0] == w[1]), "{outcomes:?}");
    Ok(())
}

#[test]
fn test_resolution_is_deterministic() -> Result<()> {
    let repo = ImageRepoFixture::new()?
        .image("base", "versions: [{ spec: ['1', '2'] }]", SCRATCH)?
        .image("app", "versions: [{ spec: ['1.0', '1.1'] }]\ndependencies: [base]\nvariables: { X: y }", SCRATCH)?;

    let first = resolve(&repo, "app")?;
    let second = resolve(&repo, "app")?;

    let summary = |chain: &velocity_cli::resolver::BuildChain| {
        chain.nodes.iter().map(|n| (n.label(), n.hash.clone(), n.tag.clone())).collect::<Vec<_>>()
    };
    assert_eq!(summary(&first), summary(&second));
    assert_eq!(first.to_tree_string(), second.to_tree_string());
    Ok(())
}

#[test]
fn test_rendering_is_deterministic() -> Result<()> {
    let sources = [
        "@from ubuntu:{{ RELEASE }}\n@run apt-get install -y {{ PACKAGES }}\n",
        "@pre\n@env A {{ RELEASE }}\n@end\n@if PACKAGES\n@run install {{ PACKAGES }}\n@else\n@run true\n@end\n",
        "@label version {{ RELEASE }}\n@entry /bin/{{ PACKAGES }}\nplain text {{ RELEASE }}\n",
    ];
    let variables = store(&[("RELEASE", "22.04"), ("PACKAGES", "curl git")]);

    for source in sources {
        let document = parse(source)?;
        let first = render(&document, &variables)?;
        let second = render(&parse(source)?, &variables)?;
        assert_eq!(first, second, "{source}");
        assert_eq!(Backend::Docker.format(&first)?, Backend::Docker.format(&second)?);
        assert_eq!(Backend::Apptainer.format(&first)?, Backend::Apptainer.format(&second)?);
    }
    Ok(())
}

#[test]
fn test_exactly_one_branch_of_a_conditional_is_rendered() -> Result<()> {
    let source = "\
@if MODE == fast
@run then {{ ONLY_IN_THEN }}
@else
@run else {{ ONLY_IN_ELSE }}
@end
";
    let document = parse(source)?;

    let fast = render(&document, &store(&[("MODE", "fast"), ("ONLY_IN_THEN", "t")]))?;
    assert_eq!(fast.main, vec![Instruction::Run("then t".to_string())]);

    for mode in ["slow", "", "FAST"] {
        let other = render(&document, &store(&[("MODE", mode), ("ONLY_IN_ELSE", "e")]))?;
        assert_eq!(other.main, vec![Instruction::Run("else e".to_string())], "MODE={mode:?}");
    }

    let undefined = render(&document, &store(&[("ONLY_IN_ELSE", "e")]))?;
    assert_eq!(undefined.main, vec![Instruction::Run("else e".to_string())]);
    Ok(())
}

#[test]
fn test_directive_free_templates_pass_through_unchanged() -> Result<()> {
    let sources = [
        "FROM ubuntu:22.04\nRUN apt-get update\n",
        "Bootstrap: docker\nFrom: ubuntu:22.04\n\n%post\n    apt-get update\n",
        "# a comment with an email user@example.org\n\n  indented line\n",
        "{{.Names}} and {{ $x }} are not variables\n",
    ];

    for source in sources {
        let script = render(&parse(source)?, &VariableStore::new())?;
        assert_eq!(Backend::Docker.format(&script)?, source);
        assert_eq!(Backend::Apptainer.format(&script)?, source);
    }
    Ok(())
}

#[test]
fn test_chain_length_is_transitive_closure_plus_one() -> Result<()> {
    let graphs: [(&[(&str, &str)], usize); 3] = [
        (&[("app", "[]")], 0),
        (&[("app", "[a, b]"), ("a", "[c]"), ("b", "[c]"), ("c", "[]")], 3),
        (&[("app", "[a]"), ("a", "[b]"), ("b", "[c]"), ("c", "[d]"), ("d", "[]")], 4),
    ];

    for (images, transitive) in graphs {
        let mut repo = ImageRepoFixture::new()?;
        for (name, deps) in images {
            repo = repo.image(name, &format!("versions: [{{ spec: '1' }}]\ndependencies: {deps}"), SCRATCH)?;
        }
        let chain = resolve(&repo, "app")?;

        assert_eq!(chain.len(), transitive + 1, "{images:?}");
        assert_eq!(chain.root().map(|n| n.name.as_str()), Some("app"));
        for (position, node) in chain.nodes.iter().enumerate() {
            for dependency in &node.dependencies {
                let index = chain.nodes.iter().position(|n| &n.name == dependency);
                assert!(index.is_some_and(|i| i < position), "{dependency} must precede {}", node.name);
            }
        }
    }
    Ok(())
}

#[test]
fn test_selection_policies() -> Result<()> {
    let repo = ImageRepoFixture::new()?.image("tool", "versions: [{ spec: ['3', '1', '2'] }]", SCRATCH)?;

    let mut options = test_options(&repo.build_dir());
    options.policy = SelectionPolicy::Highest;
    assert_eq!(labels(&resolve_with(&repo, options.clone(), "tool")?), vec!["tool@3"]);
    assert_eq!(labels(&resolve_with(&repo, options.clone(), "tool@:2")?), vec!["tool@2"]);

    options.policy = SelectionPolicy::MostRecentlyDeclared;
    assert_eq!(labels(&resolve_with(&repo, options.clone(), "tool")?), vec!["tool@2"]);
    assert_eq!(labels(&resolve_with(&repo, options, "tool@>=3")?), vec!["tool@3"]);
    Ok(())
}
