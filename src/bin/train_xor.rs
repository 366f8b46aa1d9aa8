//! Trains the XOR dense network from spec.md §8 scenario 1 end to end:
//! FC(2)+sigmoid → Output(2)+sigmoid+cross-entropy, batch size 4, plain SGD.

use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;

use conv_net_runtime::dataset::InMemoryDataset;
use conv_net_runtime::layers::{FullyConnected, Output};
use conv_net_runtime::optim::UpdateRule;
use conv_net_runtime::{Activation, BiasInit, Cost, LayerKind, Model, Sequential, TesterKind, Trainer, WeightInit};

#[derive(Parser)]
struct Args {
    #[arg(long, default_value_t = 3.0)]
    learning_rate: f32,

    #[arg(long, default_value_t = 5000)]
    max_epochs: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

const XOR_INPUTS: [f32; 8] = [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0];
const XOR_TARGETS: [f32; 4] = [0.0, 1.0, 1.0, 0.0];

fn xor_dataset() -> anyhow::Result<InMemoryDataset> {
    Ok(InMemoryDataset::new(XOR_INPUTS.to_vec(), XOR_TARGETS.to_vec(), 2, 1)?)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut rng = StdRng::seed_from_u64(args.seed);
    let hidden = FullyConnected::new(2, 2, Activation::Sigmoid, WeightInit::GlorotUniform, BiasInit::Zero, &mut rng);
    let output = Output::dense(
        2,
        1,
        Activation::Sigmoid,
        Cost::CrossEntropy,
        WeightInit::GlorotUniform,
        BiasInit::Zero,
        &mut rng,
    )?;
    let model = Sequential::new(vec![LayerKind::FullyConnected(hidden), LayerKind::Output(output)])?;

    let mut trainer = Trainer::new(
        Model::Sequential(model),
        UpdateRule::Sgd {
            lr: args.learning_rate,
            l2: 0.0,
        },
        0.0,
        TesterKind::Threshold { threshold: 0.5 },
    )?
    .with_test(Box::new(xor_dataset()?));

    let mut training = xor_dataset()?;
    let reason = trainer.train(
        &mut training,
        4,
        args.max_epochs,
        &mut rng,
        |_progress| {},
        |report| {
            if (report.epoch + 1) % 500 == 0 || report.epoch == 0 {
                println!(
                    "epoch {}: cost={:.5} accuracy={:?}",
                    report.epoch, report.cost, report.accuracy
                );
            }
        },
    )?;

    println!("training finished: {reason:?}");
    Ok(())
}
