use std::{
    fs::File,
    io::{
        BufReader,
        BufWriter,
        Write,
    },
};

use structopt::StructOpt;

use chainseer::{
    chain::{
        bfs,
        tree,
    },
    cli::{
        Args,
        Command,
        Compare,
        Format,
        Pointers,
        Scan,
    },
    codec::{
        read_chain_file,
        text,
        write_chain_file,
        ChainFile,
    },
    compare::{
        compare_binary_files,
        compare_text_files,
        CompareResult,
    },
    mem::{
        derive_static_modules,
        filter_by_kind_mask,
        read_process_regions,
        Kind,
        ProcessMemory,
    },
    pool::ThreadPool,
    scan::{
        scan_pointers,
        ScanOptions,
    },
    word::WordSize,
    Error,
};

fn worker_count() -> usize {
    let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    (n * 3 / 2).max(1)
}

fn run_search(cmd: &Scan) -> Result<(bfs::BfsResult, tree::ChainTree, WordSize), Error> {
    let pid = cmd.target().resolve()?;
    log::info!("resolved target to pid {}", pid);

    let regions = read_process_regions(Some(pid))?;
    let modules = derive_static_modules(&regions);
    log::debug!("{} regions classified into {} static modules", regions.len(), modules.len());

    let remote = ProcessMemory::new(pid);
    let pool = ThreadPool::new(worker_count());
    let word_size = WordSize::host();

    let scan_regions = filter_by_kind_mask(&regions, Kind::ALL);
    let table = scan_pointers(&remote, &scan_regions, word_size, &ScanOptions::default(), &pool)?;
    log::info!("scanned {} candidate pointers", table.len());

    let mut bfs_result = bfs::search(table.as_slice(), &modules, &cmd.addrs, cmd.depth, cmd.offset, cmd.limit, &pool)?;
    let chain_tree = tree::build(&mut bfs_result);

    Ok((bfs_result, chain_tree, word_size))
}

fn scan_command(cmd: &Scan) -> Result<(), Error> {
    let (bfs_result, chain_tree, word_size) = run_search(cmd)?;

    let mut out = BufWriter::new(File::create(&cmd.out)?);
    let total = write_chain_file(&mut out, &bfs_result, &chain_tree, word_size)?;
    out.flush()?;

    println!("wrote {} chains to {}", total, cmd.out.display());
    Ok(())
}

fn scan_text_command(cmd: &Scan) -> Result<(), Error> {
    let (bfs_result, chain_tree, word_size) = run_search(cmd)?;
    let chain_file = ChainFile::from_bfs(&bfs_result, &chain_tree, word_size);

    let mut out = BufWriter::new(File::create(&cmd.out)?);
    text::render(&mut out, &chain_file)?;
    out.flush()?;

    println!("wrote text chains to {}", cmd.out.display());
    Ok(())
}

fn format_command(cmd: &Format) -> Result<(), Error> {
    let mut input = BufReader::new(File::open(&cmd.input)?);
    let chain_file = read_chain_file(&mut input)?;

    if cmd.per_module {
        let dir = cmd.out.clone().unwrap_or_else(|| cmd.input.with_extension(""));
        std::fs::create_dir_all(&dir)?;

        for symbol in &chain_file.symbols {
            let path = dir.join(format!("{}.{}.txt", symbol.name, symbol.count));
            let mut out = BufWriter::new(File::create(&path)?);
            let single = ChainFile {
                word_size: chain_file.word_size,
                symbols:   vec![chainseer::codec::ChainSymbol {
                    start:   symbol.start,
                    name:    symbol.name.clone(),
                    range:   symbol.range,
                    count:   symbol.count,
                    level:   symbol.level,
                    results: symbol.results.clone(),
                }],
                contents:  chain_file.contents.clone(),
            };
            text::render(&mut out, &single)?;
            out.flush()?;
        }
        return Ok(());
    }

    match &cmd.out {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            text::render(&mut out, &chain_file)?;
            out.flush()?;
        }
        None => {
            let mut out = std::io::stdout();
            text::render(&mut out, &chain_file)?;
        }
    }

    Ok(())
}

fn print_compare_result(result: &CompareResult) {
    println!("lhs_total: {}\nrhs_total: {}\nunchanged: {}", result.lhs_total, result.rhs_total, result.unchanged);
    for module in &result.modules {
        println!("  {}[{}]: {} chains in common", module.module_name, module.module_index, module.common.len());
    }
}

fn compare_command(cmd: &Compare) -> Result<(), Error> {
    let mut lhs = BufReader::new(File::open(&cmd.lhs)?);
    let mut rhs = BufReader::new(File::open(&cmd.rhs)?);

    let result = if cmd.text { compare_text_files(&mut lhs, &mut rhs)? } else { compare_binary_files(&mut lhs, &mut rhs)? };

    print_compare_result(&result);
    Ok(())
}

fn pointers_command(cmd: &Pointers) -> Result<(), Error> {
    let pid = cmd.target().resolve()?;
    let regions = read_process_regions(Some(pid))?;

    let mask = cmd.mask.map(|m| m as u32).unwrap_or(Kind::ALL);
    let mut selected = filter_by_kind_mask(&regions, mask);

    if let Some((lo, hi)) = cmd.range {
        selected.retain(|r| r.start() < hi && r.end() > lo);
    }

    let remote = ProcessMemory::new(pid);
    let pool = ThreadPool::new(worker_count());
    let table = scan_pointers(&remote, &selected, WordSize::host(), &ScanOptions::default(), &pool)?;

    for pointer in table.as_slice() {
        println!("{:#x}: {:#x}", pointer.address, pointer.value);
    }

    Ok(())
}

fn main() {
    let args = Args::from_args();

    let level = if args.debug { log::LevelFilter::Debug } else { log::LevelFilter::Warn };
    env_logger::builder().filter_level(level).init();

    log::debug!("program arguments: {:#?}", args);

    let result = match &args.cmd {
        Command::Scan(cmd) => scan_command(cmd),
        Command::ScanText(cmd) => scan_text_command(cmd),
        Command::Format(cmd) => format_command(cmd),
        Command::Compare(cmd) => compare_command(cmd),
        Command::Pointers(cmd) => pointers_command(cmd),
    };

    if let Err(err) = result {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
