//! Exposes the grader's test cases to `cargo test`.

macro_rules! grade {
    ($($module:ident: [$($test:ident),* $(,)?]),* $(,)?) => {
        $(
            mod $module {
                $(
                    #[test]
                    fn $test() {
                        vm_grader::init_logger();
                        vm_grader::$module::$test()
                    }
                )*
            }
        )*
    };
}

grade! {
    frame_table: [
        record_and_lookup,
        record_replaces,
        release,
        release_unowned_panics,
        lookups_are_read_only,
        frames_of_process,
    ],
    spt: [
        insert_lazy,
        insert_resident,
        insert_overwrites,
        lookup_unaligned,
        clear,
        clear_missing_panics,
        remove,
        per_process_keys,
    ],
    swap: [
        geometry,
        write_out_layout,
        round_trip,
        unused_slots_first,
        reuse_lowest_free,
        exhaustion,
        write_error_consumes_nothing,
        read_error_keeps_slot,
        release_all,
        duplicate_owner_panics,
    ],
    eviction: [
        fifo_order,
        fifo_reinsert,
        fifo_release,
        fifo_reinstate,
        clock_second_chance,
        clock_all_accessed,
    ],
    fault: [
        null_address,
        kernel_address,
        guard_page,
        stack_margin,
        stack_above_sp,
        stack_grows_down,
        stack_limit,
        guard_page_allowed,
        unbacked,
        mapped_page_faults_again,
        write_to_read_only,
        error_code,
        kill_releases_memory,
        swap_exhaustion_kills,
        register_errors,
        process_errors,
        fault_after_exit,
    ],
    scenario: [
        lazy_load_code,
        evict_oldest,
        swap_in,
        exit_frees_swap,
        cross_page_access,
        mmap_write_back,
        mmap_write_back_swapped,
        mmap_clean_pages,
        exit_writes_back,
        read_only_swap,
        mmap_lost_write_back,
    ],
    concurrency: [
        disjoint_processes,
        exit_while_faulting,
    ],
}
