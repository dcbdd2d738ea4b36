pub(crate) mod helpers;
mod test_consensus;
mod test_fake_network;
