mod consensus;
